//! In-memory user collection.
//!
//! Each worker owns one `UserStore` through its replica task, and the primary
//! owns one more as the mirror it rebroadcasts. Insertion order is preserved
//! because `GET /api/users` returns records in creation order.

use crate::model::{MutationEvent, Operation, User, UserId};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct UserStore {
    users: Vec<User>,
}

impl UserStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn list(&self) -> &[User] {
        &self.users
    }

    pub fn find(&self, id: &UserId) -> Option<&User> {
        self.users.iter().find(|user| user.id == *id)
    }

    pub fn insert(&mut self, user: User) {
        self.users.push(user);
    }

    /// Overwrites the record with the same id in place. Returns `false` when
    /// no such record exists.
    pub fn replace(&mut self, user: User) -> bool {
        match self.users.iter_mut().find(|existing| existing.id == user.id) {
            Some(existing) => {
                *existing = user;
                true
            }
            None => false,
        }
    }

    pub fn remove(&mut self, id: &UserId) -> Option<User> {
        let index = self.users.iter().position(|user| user.id == *id)?;
        Some(self.users.remove(index))
    }

    /// Swaps the whole collection for a snapshot received from the primary.
    pub fn replace_all(&mut self, users: Vec<User>) {
        self.users = users;
    }

    /// Folds one event into the collection.
    ///
    /// A create for an id that is already present overwrites it, so a
    /// duplicated event does not produce a duplicated record.
    pub fn apply(&mut self, event: &MutationEvent) {
        let record = &event.record;
        match event.operation {
            Operation::Create => {
                if !self.replace(record.clone()) {
                    self.insert(record.clone());
                }
            }
            Operation::Update => {
                self.replace(record.clone());
            }
            Operation::Delete => {
                self.remove(&record.id);
            }
        }
    }

    pub fn snapshot(&self) -> Vec<User> {
        self.users.clone()
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::UserDraft;

    fn user(name: &str) -> User {
        UserDraft {
            username: name.into(),
            age: 30.into(),
            hobbies: vec![],
        }
        .into_user(UserId::new_v4())
    }

    #[test]
    fn keeps_insertion_order() {
        let mut store = UserStore::new();
        let (a, b, c) = (user("a"), user("b"), user("c"));
        store.insert(a.clone());
        store.insert(b.clone());
        store.insert(c.clone());

        let names: Vec<&str> = store.list().iter().map(|u| u.username.as_str()).collect();
        assert_eq!(names, ["a", "b", "c"]);
        assert_eq!(store.find(&b.id), Some(&b));
    }

    #[test]
    fn apply_replays_a_history() {
        let mut store = UserStore::new();
        let alice = user("alice");
        let bob = user("bob");

        store.apply(&MutationEvent::created(alice.clone()));
        store.apply(&MutationEvent::created(bob.clone()));

        let mut renamed = alice.clone();
        renamed.username = "alicia".into();
        store.apply(&MutationEvent::updated(renamed.clone()));
        store.apply(&MutationEvent::deleted(bob.clone()));

        assert_eq!(store.list(), [renamed]);
    }

    #[test]
    fn apply_tolerates_duplicates_and_unknown_records() {
        let mut store = UserStore::new();
        let alice = user("alice");

        store.apply(&MutationEvent::created(alice.clone()));
        store.apply(&MutationEvent::created(alice.clone()));
        assert_eq!(store.len(), 1);

        let ghost = user("ghost");
        store.apply(&MutationEvent::updated(ghost.clone()));
        store.apply(&MutationEvent::deleted(ghost));
        assert_eq!(store.list(), [alice]);
    }

    #[test]
    fn replace_all_discards_previous_state() {
        let mut store = UserStore::new();
        store.insert(user("old"));

        let fresh = vec![user("x"), user("y")];
        store.replace_all(fresh.clone());
        assert_eq!(store.snapshot(), fresh);

        store.replace_all(Vec::new());
        assert!(store.is_empty());
    }
}
