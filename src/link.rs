//! Command uplink and response downlink, serviced once per cycle.
//!
//! Each deframed packet from the ground link starts with a big-endian u32
//! opcode. The command splitter forwards opcodes at or above its remote base
//! to the hub; the rest are looked up in the command dispatcher and executed
//! here. Packets arriving from the hub were already routed and are executed
//! directly. Every executed command leaves a response event on the events
//! lane of the com queue, which is drained in lane priority order through the
//! framer to the ground link.

use crate::components::prm_db::PRM_DB_COMMANDS;
use crate::components::{ComponentSet, Route};
use crate::queue::MessageClass;
use tracing::{debug, warn};

pub const OPCODE_SIZE: usize = core::mem::size_of::<u32>();

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CommandStatus {
    Ok = 0,
    InvalidOpcode = 1,
    ExecutionError = 2,
}

impl CommandStatus {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(CommandStatus::Ok),
            1 => Some(CommandStatus::InvalidOpcode),
            2 => Some(CommandStatus::ExecutionError),
            _ => None,
        }
    }
}

/// Response event: the opcode followed by one status byte.
pub fn response_event(opcode: u32, status: CommandStatus) -> [u8; OPCODE_SIZE + 1] {
    let mut event = [0u8; OPCODE_SIZE + 1];
    event[..OPCODE_SIZE].copy_from_slice(&opcode.to_be_bytes());
    event[OPCODE_SIZE] = status as u8;
    event
}

pub fn opcode_of(packet: &[u8]) -> Option<u32> {
    let bytes: [u8; OPCODE_SIZE] = packet.get(..OPCODE_SIZE)?.try_into().ok()?;
    Some(u32::from_be_bytes(bytes))
}

/// What one service pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkActivity {
    pub executed: usize,
    pub rejected: usize,
    pub forwarded: usize,
    pub downlinked: usize,
    pub dropped: usize,
}

pub fn service(components: &mut ComponentSet) -> LinkActivity {
    let mut activity = LinkActivity::default();

    for packet in components.deframer.take_frames() {
        let Some(opcode) = opcode_of(&packet) else {
            warn!(len = packet.len(), "uplink packet too short for an opcode");
            activity.rejected += 1;
            continue;
        };
        match components.cmd_splitter.route(opcode) {
            Route::Remote => forward(components, opcode, &packet, &mut activity),
            Route::Local => execute(components, opcode, &mut activity),
        }
    }
    for packet in components.hub_deframer.take_frames() {
        match opcode_of(&packet) {
            Some(opcode) => execute(components, opcode, &mut activity),
            None => {
                warn!(len = packet.len(), "hub packet too short for an opcode");
                activity.rejected += 1;
            }
        }
    }

    downlink(components, &mut activity);
    activity
}

fn forward(components: &mut ComponentSet, opcode: u32, packet: &[u8], activity: &mut LinkActivity) {
    let sent = components
        .hub_framer
        .frame(packet)
        .map_err(|e| e.to_string())
        .and_then(|frame| components.hub_com_driver.send(frame).map_err(|e| e.to_string()));
    match sent {
        Ok(()) => {
            debug!(opcode = %format_args!("{opcode:#x}"), "command forwarded to hub");
            activity.forwarded += 1;
        }
        Err(e) => {
            warn!(opcode = %format_args!("{opcode:#x}"), error = %e, "command not forwarded");
            activity.dropped += 1;
        }
    }
}

fn execute(components: &mut ComponentSet, opcode: u32, activity: &mut LinkActivity) {
    let status = match components.cmd_disp.lookup(opcode) {
        None => {
            warn!(opcode = %format_args!("{opcode:#x}"), "no command registered at opcode");
            CommandStatus::InvalidOpcode
        }
        Some(entry) if PRM_DB_COMMANDS.contains(&entry.mnemonic) => {
            match components.prm_db.save_param_file() {
                Ok(()) => CommandStatus::Ok,
                Err(e) => {
                    warn!(error = %e, "parameter save failed");
                    CommandStatus::ExecutionError
                }
            }
        }
        Some(entry) => {
            debug!(command = entry.mnemonic, owner = %entry.owner, "command accepted");
            CommandStatus::Ok
        }
    };
    if status == CommandStatus::Ok {
        activity.executed += 1;
    } else {
        activity.rejected += 1;
    }

    if let Err(e) = components
        .com_queue
        .enqueue(MessageClass::Events, &response_event(opcode, status))
    {
        debug!(error = %e, "response event not queued");
    }
}

fn downlink(components: &mut ComponentSet, activity: &mut LinkActivity) {
    while let Some((class, message)) = components.com_queue.dequeue() {
        let sent = components
            .framer
            .frame(&message)
            .map_err(|e| e.to_string())
            .and_then(|frame| components.com_driver.send(frame).map_err(|e| e.to_string()));
        match sent {
            Ok(()) => activity.downlinked += 1,
            Err(e) => {
                debug!(lane = class.as_str(), error = %e, "downlink message dropped");
                activity.dropped += 1;
            }
        }
    }
}
