//! CRUD rules for users.
//!
//! [`UserService`] validates input, applies the change to the store it is
//! handed, and publishes exactly one [`MutationEvent`] per successful
//! create, update or delete. Reads and rejected calls publish nothing.

use crate::{
    error::ApiError,
    model::{MutationEvent, User, UserDraft, UserId},
    store::UserStore,
};

/// Destination for the events a [`UserService`] produces.
pub trait MutationSink {
    fn emit(&mut self, event: MutationEvent);
}

impl MutationSink for Vec<MutationEvent> {
    fn emit(&mut self, event: MutationEvent) {
        self.push(event);
    }
}

/// Sink for a process that has no primary to report to.
#[derive(Debug, Default, Clone, Copy)]
pub struct Discard;

impl MutationSink for Discard {
    fn emit(&mut self, _event: MutationEvent) {}
}

pub struct UserService<S> {
    sink: S,
}

impl<S: MutationSink> UserService<S> {
    pub fn new(sink: S) -> Self {
        Self { sink }
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn list(&self, store: &UserStore) -> Vec<User> {
        store.snapshot()
    }

    pub fn get(&self, store: &UserStore, id: &str) -> Result<User, ApiError> {
        let id = UserId::parse(id)?;
        store.find(&id).cloned().ok_or(ApiError::NotFound)
    }

    pub fn create(&mut self, store: &mut UserStore, payload: &[u8]) -> Result<User, ApiError> {
        let draft = UserDraft::from_slice(payload)?;
        let user = draft.into_user(UserId::new_v4());

        store.insert(user.clone());
        self.sink.emit(MutationEvent::created(user.clone()));
        Ok(user)
    }

    /// Checks the id first, then existence, and only then the payload, so an
    /// unknown id with a broken body is reported as not found.
    pub fn update(
        &mut self,
        store: &mut UserStore,
        id: &str,
        payload: &[u8],
    ) -> Result<User, ApiError> {
        let id = UserId::parse(id)?;
        if store.find(&id).is_none() {
            return Err(ApiError::NotFound);
        }

        let user = UserDraft::from_slice(payload)?.into_user(id);
        store.replace(user.clone());
        self.sink.emit(MutationEvent::updated(user.clone()));
        Ok(user)
    }

    pub fn delete(&mut self, store: &mut UserStore, id: &str) -> Result<(), ApiError> {
        let id = UserId::parse(id)?;
        let removed = store.remove(&id).ok_or(ApiError::NotFound)?;
        self.sink.emit(MutationEvent::deleted(removed));
        Ok(())
    }
}
