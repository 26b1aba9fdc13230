//! Peer side dispatch of decoded frames.
//!
//! A client registers one [Command] per tag it understands in a [CommandSet]; the
//! set decodes incoming packets and hands them to the first command accepting the
//! tag. Adding a tag means adding a command, not touching a `match`.
use log::trace;

use crate::device::frame::{Frame, FrameError, Tag};

pub trait Command<Ctx> {
    fn can_handle(&self, tag: Tag) -> bool;

    /// Handles one frame. Returns the encoded reply to send back, if any.
    fn process(&mut self, ctx: &mut Ctx, frame: &Frame<'_>) -> Option<Vec<u8>>;
}

/// Result of [CommandSet::dispatch].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    Handled { reply: Option<Vec<u8>> },
    Unhandled(Tag),
}

pub struct CommandSet<Ctx> {
    commands: Vec<Box<dyn Command<Ctx>>>,
}

impl<Ctx> Default for CommandSet<Ctx> {
    fn default() -> Self {
        Self {
            commands: Vec::new(),
        }
    }
}

impl<Ctx> CommandSet<Ctx> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_command<C>(&mut self, command: C) -> &mut Self
    where
        C: Command<Ctx> + 'static,
    {
        self.commands.push(Box::new(command));
        self
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn dispatch(&mut self, ctx: &mut Ctx, packet: &[u8]) -> Result<Dispatch, FrameError> {
        let frame = Frame::try_from_bytes(packet)?;
        let tag = frame.tag();
        match self.commands.iter_mut().find(|command| command.can_handle(tag)) {
            Some(command) => Ok(Dispatch::Handled {
                reply: command.process(ctx, &frame),
            }),
            None => {
                trace!("No command for {:?}.", tag);
                Ok(Dispatch::Unhandled(tag))
            }
        }
    }
}
