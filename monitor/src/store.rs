//! User records and the store contract the pipeline reads them through
//!
//! Records are resolved at send time, so edits made while an alert is
//! queued reach the recipients it is sent to.

use crate::error::{MonitorError, Result};
use crate::types::UserId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::RwLock;

fn non_empty(value: &str) -> Option<&str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmergencyContact {
    pub name: String,
    pub phone: String,
    pub email: String,
    pub address: String,
    pub relationship: String,
}

impl EmergencyContact {
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_phone<S: Into<String>>(mut self, phone: S) -> Self {
        self.phone = phone.into();
        self
    }

    pub fn with_email<S: Into<String>>(mut self, email: S) -> Self {
        self.email = email.into();
        self
    }

    pub fn with_relationship<S: Into<String>>(mut self, relationship: S) -> Self {
        self.relationship = relationship.into();
        self
    }

    pub fn phone_number(&self) -> Option<&str> {
        non_empty(&self.phone)
    }

    pub fn email_address(&self) -> Option<&str> {
        non_empty(&self.email)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Doctor {
    pub name: String,
    pub phone: String,
    pub email: String,
    pub address: String,
    pub specialization: String,
}

impl Doctor {
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_phone<S: Into<String>>(mut self, phone: S) -> Self {
        self.phone = phone.into();
        self
    }

    pub fn with_email<S: Into<String>>(mut self, email: S) -> Self {
        self.email = email.into();
        self
    }

    pub fn phone_number(&self) -> Option<&str> {
        non_empty(&self.phone)
    }

    pub fn email_address(&self) -> Option<&str> {
        non_empty(&self.email)
    }
}

/// A monitored person with the people to alert on their behalf
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct User {
    pub id: UserId,
    pub name: String,
    pub emergency_contacts: Vec<EmergencyContact>,
    pub family_doctor: Option<Doctor>,
    pub notes: String,
    /// Reference image used to recognise the user
    pub image_reference: Option<String>,
}

impl User {
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_contact(mut self, contact: EmergencyContact) -> Self {
        self.emergency_contacts.push(contact);
        self
    }

    pub fn with_doctor(mut self, doctor: Doctor) -> Self {
        self.family_doctor = Some(doctor);
        self
    }
}

/// Read access the pipeline needs to user records
pub trait UserStore: Send + Sync {
    fn get_user_by_id(&self, id: UserId) -> Option<User>;

    /// All users ordered by id
    fn get_all_users(&self) -> Vec<User>;
}

/// Thread-safe in-memory user store
#[derive(Debug, Default)]
pub struct InMemoryUserStore {
    users: RwLock<BTreeMap<UserId, User>>,
}

impl InMemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a JSON array of users, keeping their ids
    pub fn from_json_str(json: &str) -> Result<Self> {
        let users: Vec<User> = serde_json::from_str(json)?;
        let store = Self::new();
        {
            let mut map = store.write();
            for user in users {
                if map.insert(user.id, user).is_some() {
                    return Err(MonitorError::config("duplicate user id in user list"));
                }
            }
            log::info!("Loaded {} users", map.len());
        }
        Ok(store)
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, BTreeMap<UserId, User>> {
        self.users.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, BTreeMap<UserId, User>> {
        self.users.write().unwrap_or_else(|e| e.into_inner())
    }

    fn with_user<T>(&self, id: UserId, f: impl FnOnce(&mut User) -> Result<T>) -> Result<T> {
        let mut users = self.write();
        let user = users.get_mut(&id).ok_or(MonitorError::UnknownUser(id))?;
        f(user)
    }

    /// Insert a user under the next free id and return it
    pub fn add_user(&self, mut user: User) -> UserId {
        let mut users = self.write();
        let id = users.keys().next_back().map(|id| id + 1).unwrap_or(1);
        user.id = id;
        log::debug!("Adding user {} ({})", id, user.name);
        users.insert(id, user);
        id
    }

    pub fn update_user(&self, user: User) -> Result<()> {
        self.with_user(user.id, |existing| {
            *existing = user;
            Ok(())
        })
    }

    pub fn delete_user(&self, id: UserId) -> Result<()> {
        self.write()
            .remove(&id)
            .map(|_| ())
            .ok_or(MonitorError::UnknownUser(id))
    }

    pub fn add_emergency_contact(&self, user_id: UserId, contact: EmergencyContact) -> Result<()> {
        self.with_user(user_id, |user| {
            user.emergency_contacts.push(contact);
            Ok(())
        })
    }

    pub fn update_emergency_contact(
        &self,
        user_id: UserId,
        index: usize,
        contact: EmergencyContact,
    ) -> Result<()> {
        self.with_user(user_id, |user| {
            let slot = user
                .emergency_contacts
                .get_mut(index)
                .ok_or(MonitorError::UnknownContact { user: user_id, index })?;
            *slot = contact;
            Ok(())
        })
    }

    pub fn delete_emergency_contact(&self, user_id: UserId, index: usize) -> Result<()> {
        self.with_user(user_id, |user| {
            if index >= user.emergency_contacts.len() {
                return Err(MonitorError::UnknownContact { user: user_id, index });
            }
            user.emergency_contacts.remove(index);
            Ok(())
        })
    }

    pub fn set_family_doctor(&self, user_id: UserId, doctor: Option<Doctor>) -> Result<()> {
        self.with_user(user_id, |user| {
            user.family_doctor = doctor;
            Ok(())
        })
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}

impl UserStore for InMemoryUserStore {
    fn get_user_by_id(&self, id: UserId) -> Option<User> {
        self.read().get(&id).cloned()
    }

    fn get_all_users(&self) -> Vec<User> {
        self.read().values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alice() -> User {
        User::new("Alice")
            .with_contact(EmergencyContact::new("Bob").with_phone("+15550001"))
            .with_doctor(Doctor::new("Dr. Who").with_email("who@clinic.test"))
    }

    #[test]
    fn test_add_assigns_increasing_ids() {
        let store = InMemoryUserStore::new();
        let a = store.add_user(alice());
        let b = store.add_user(User::new("Carol"));
        assert_eq!((a, b), (1, 2));
        assert_eq!(store.get_user_by_id(a).unwrap().name, "Alice");
        let names: Vec<String> = store.get_all_users().into_iter().map(|u| u.name).collect();
        assert_eq!(names, vec!["Alice", "Carol"]);
    }

    #[test]
    fn test_update_and_delete() {
        let store = InMemoryUserStore::new();
        let id = store.add_user(alice());

        let mut user = store.get_user_by_id(id).unwrap();
        user.notes = "uses a walker".to_string();
        store.update_user(user).unwrap();
        assert_eq!(store.get_user_by_id(id).unwrap().notes, "uses a walker");

        store.delete_user(id).unwrap();
        assert!(store.get_user_by_id(id).is_none());
        assert!(matches!(store.delete_user(id), Err(MonitorError::UnknownUser(1))));
        assert!(store.is_empty());
    }

    #[test]
    fn test_contact_management() {
        let store = InMemoryUserStore::new();
        let id = store.add_user(alice());

        let dana = EmergencyContact::new("Dana").with_email("dana@example.test");
        store.add_emergency_contact(id, dana).unwrap();
        store
            .update_emergency_contact(id, 0, EmergencyContact::new("Bob").with_phone("+15550002"))
            .unwrap();
        let contacts = store.get_user_by_id(id).unwrap().emergency_contacts;
        assert_eq!(contacts.len(), 2);
        assert_eq!(contacts[0].phone_number(), Some("+15550002"));

        store.delete_emergency_contact(id, 0).unwrap();
        assert_eq!(store.get_user_by_id(id).unwrap().emergency_contacts[0].name, "Dana");
        assert!(matches!(
            store.delete_emergency_contact(id, 5),
            Err(MonitorError::UnknownContact { index: 5, .. })
        ));

        store.set_family_doctor(id, None).unwrap();
        assert!(store.get_user_by_id(id).unwrap().family_doctor.is_none());
    }

    #[test]
    fn test_blank_channels_are_absent() {
        let contact = EmergencyContact::new("Eve").with_phone("   ");
        assert_eq!(contact.phone_number(), None);
        assert_eq!(contact.email_address(), None);
    }

    #[test]
    fn test_load_from_json() {
        let json = r#"[
            { "id": 7, "name": "Frank",
              "emergencyContacts": [
                  { "name": "Gina", "phone": "+1555", "relationship": "daughter" }
              ],
              "familyDoctor": { "name": "Dr. House", "email": "house@ppth.test" } },
            { "id": 3, "name": "Hal" }
        ]"#;
        let store = InMemoryUserStore::from_json_str(json).unwrap();
        assert_eq!(store.len(), 2);
        let frank = store.get_user_by_id(7).unwrap();
        assert_eq!(frank.emergency_contacts[0].relationship, "daughter");
        assert_eq!(
            frank.family_doctor.unwrap().email_address(),
            Some("house@ppth.test")
        );
        // new users continue after the highest loaded id
        assert_eq!(store.add_user(User::new("Ivy")), 8);
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let json = r#"[{ "id": 1, "name": "A" }, { "id": 1, "name": "B" }]"#;
        assert!(InMemoryUserStore::from_json_str(json).is_err());
    }
}
