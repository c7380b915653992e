//! Arena of loaded model sessions addressed by generation-checked handles.
//!
//! A handle is an index plus the generation of the slot it was issued for.
//! Closing a session bumps the slot's generation, so stale handles and
//! double closes are rejected instead of reaching a reused slot.

use crate::config::GenerationRequest;
use crate::errors::SlmError;
use crate::inference::{Completion, GenerationObserver, TextGenerator};
use crate::model::SequenceModel;
use crate::tokenizer::Tokenizer;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionHandle {
    index: u32,
    generation: u32,
}

impl SessionHandle {
    /// Pack into one integer (generation in the high half). Never 0.
    pub fn to_raw(self) -> u64 {
        (u64::from(self.generation) << 32) | u64::from(self.index)
    }

    pub fn from_raw(raw: u64) -> Self {
        Self {
            index: raw as u32,
            generation: (raw >> 32) as u32,
        }
    }
}

struct Slot<M, T> {
    /// Starts at 1, so a zeroed raw handle never matches.
    generation: u32,
    occupant: Option<TextGenerator<M, T>>,
}

pub struct SessionArena<M, T> {
    slots: Vec<Slot<M, T>>,
    free: Vec<u32>,
    live: usize,
}

impl<M, T> Default for SessionArena<M, T> {
    fn default() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            live: 0,
        }
    }
}

impl<M: SequenceModel, T: Tokenizer> SessionArena<M, T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a model/tokenizer pair and return its handle.
    pub fn open(&mut self, model: M, tokenizer: T) -> SessionHandle {
        let generator = TextGenerator::new(model, tokenizer);
        let index = match self.free.pop() {
            Some(index) => {
                self.slots[index as usize].occupant = Some(generator);
                index
            }
            None => {
                self.slots.push(Slot {
                    generation: 1,
                    occupant: Some(generator),
                });
                (self.slots.len() - 1) as u32
            }
        };
        self.live += 1;
        let handle = SessionHandle {
            index,
            generation: self.slots[index as usize].generation,
        };
        debug!(handle = handle.to_raw(), "Session opened");
        handle
    }

    fn slot_mut(&mut self, handle: SessionHandle) -> Result<&mut Slot<M, T>, SlmError> {
        match self.slots.get_mut(handle.index as usize) {
            Some(slot) if slot.generation == handle.generation && slot.occupant.is_some() => {
                Ok(slot)
            }
            _ => Err(SlmError::InvalidHandle),
        }
    }

    pub fn get_mut(&mut self, handle: SessionHandle) -> Result<&mut TextGenerator<M, T>, SlmError> {
        self.slot_mut(handle)?
            .occupant
            .as_mut()
            .ok_or(SlmError::InvalidHandle)
    }

    /// Run one completion on the session behind `handle`.
    pub fn complete<O: GenerationObserver + ?Sized>(
        &mut self,
        handle: SessionHandle,
        request: &GenerationRequest,
        observer: &mut O,
    ) -> Result<Completion, SlmError> {
        self.get_mut(handle)?.complete(request, observer)
    }

    /// Release the session and hand back its model and tokenizer.
    pub fn close(&mut self, handle: SessionHandle) -> Result<(M, T), SlmError> {
        let slot = self.slot_mut(handle)?;
        let generator = slot.occupant.take().ok_or(SlmError::InvalidHandle)?;
        slot.generation = slot.generation.wrapping_add(1).max(1);
        self.free.push(handle.index);
        self.live -= 1;
        debug!(handle = handle.to_raw(), "Session closed");
        Ok(generator.into_parts())
    }

    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }
}
