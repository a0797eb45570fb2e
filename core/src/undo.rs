//! Undo/redo history of serialized snapshots.
//!
//! States are stored as JSON text rather than as `T`, so a snapshot can never
//! alias the live value the caller keeps editing.

use std::collections::VecDeque;
use std::marker::PhantomData;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::decode::decode;
use crate::error::FetchError;

#[derive(Debug, Clone)]
pub struct UndoHistory<T> {
    undo: VecDeque<String>,
    current: String,
    redo: VecDeque<String>,
    /// Maximum undo depth; `None` is unbounded.
    limit: Option<usize>,
    _state: PhantomData<fn() -> T>,
}

impl<T: Serialize + DeserializeOwned> UndoHistory<T> {
    pub fn new(initial: &T, limit: Option<usize>) -> Result<Self, serde_json::Error> {
        Ok(Self {
            undo: VecDeque::new(),
            current: serde_json::to_string(initial)?,
            redo: VecDeque::new(),
            limit,
            _state: PhantomData,
        })
    }

    /// Record `state` as the new current state. Discards the redo branch.
    pub fn register(&mut self, state: &T) -> Result<(), serde_json::Error> {
        let next = serde_json::to_string(state)?;
        let previous = std::mem::replace(&mut self.current, next);
        self.undo.push_front(previous);
        if let Some(limit) = self.limit {
            self.undo.truncate(limit);
        }
        self.redo.clear();
        Ok(())
    }

    /// Step back one state. With nothing to undo, the current state is
    /// returned unchanged.
    pub fn undo(&mut self) -> Result<T, FetchError> {
        if let Some(state) = self.undo.pop_front() {
            let previous = std::mem::replace(&mut self.current, state);
            self.redo.push_front(previous);
        }
        self.current()
    }

    /// Step forward one state. With nothing to redo, the current state is
    /// returned unchanged.
    pub fn redo(&mut self) -> Result<T, FetchError> {
        if let Some(state) = self.redo.pop_front() {
            let previous = std::mem::replace(&mut self.current, state);
            self.undo.push_front(previous);
        }
        self.current()
    }

    pub fn current(&self) -> Result<T, FetchError> {
        decode(self.current.as_bytes())
    }

    pub fn can_undo(&self) -> bool {
        !self.undo.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo.is_empty()
    }

    pub fn undo_depth(&self) -> usize {
        self.undo.len()
    }
}
