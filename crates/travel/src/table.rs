//! Reservation table collaborator and its in-memory implementation.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::Money;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::TableError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReservationStatus {
    Reserved,
    Cancelled,
}

impl ReservationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReservationStatus::Reserved => "RESERVED",
            ReservationStatus::Cancelled => "CANCELLED",
        }
    }
}

/// Result of [`ReservationTable::upsert`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Stored,
    /// An item with this id was already cancelled and was left untouched.
    AlreadyCancelled,
}

/// One stored reservation, keyed by its id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReservationItem {
    pub id: String,
    pub status: ReservationStatus,
    pub price: Money,
    /// Service-specific request fields (names, dates, locations).
    pub attributes: Map<String, Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Storage for one service's reservations.
#[async_trait]
pub trait ReservationTable: Send + Sync {
    /// Inserts the item or replaces a `RESERVED` item with the same id.
    ///
    /// Replacing keeps the original `created_at`. A `CANCELLED` item is never
    /// replaced: cancellation is final for its id.
    async fn upsert(&self, item: ReservationItem) -> Result<UpsertOutcome, TableError>;

    async fn get(&self, id: &str) -> Result<Option<ReservationItem>, TableError>;

    /// Sets the status of an existing item. Returns `None` if there is none.
    async fn update_status(
        &self,
        id: &str,
        status: ReservationStatus,
    ) -> Result<Option<ReservationItem>, TableError>;
}

#[async_trait]
impl<T: ReservationTable + ?Sized> ReservationTable for Arc<T> {
    async fn upsert(&self, item: ReservationItem) -> Result<UpsertOutcome, TableError> {
        (**self).upsert(item).await
    }

    async fn get(&self, id: &str) -> Result<Option<ReservationItem>, TableError> {
        (**self).get(id).await
    }

    async fn update_status(
        &self,
        id: &str,
        status: ReservationStatus,
    ) -> Result<Option<ReservationItem>, TableError> {
        (**self).update_status(id, status).await
    }
}

#[derive(Debug, Default)]
struct InMemoryTableState {
    items: HashMap<String, ReservationItem>,
    fail_on_write: bool,
}

/// In-memory reservation table.
#[derive(Debug, Clone, Default)]
pub struct InMemoryReservationTable {
    state: Arc<RwLock<InMemoryTableState>>,
}

impl InMemoryReservationTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every following write fail with `TableError::Unavailable`.
    pub fn set_fail_on_write(&self, fail: bool) {
        self.state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .fail_on_write = fail;
    }

    /// Number of stored items, whatever their status.
    pub fn item_count(&self) -> usize {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .items
            .len()
    }

    /// Number of items currently `RESERVED`.
    pub fn reserved_count(&self) -> usize {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .items
            .values()
            .filter(|item| item.status == ReservationStatus::Reserved)
            .count()
    }

    pub fn status_of(&self, id: &str) -> Option<ReservationStatus> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .items
            .get(id)
            .map(|item| item.status)
    }
}

#[async_trait]
impl ReservationTable for InMemoryReservationTable {
    async fn upsert(&self, mut item: ReservationItem) -> Result<UpsertOutcome, TableError> {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if state.fail_on_write {
            return Err(TableError::Unavailable("write rejected".to_string()));
        }
        if let Some(existing) = state.items.get(&item.id) {
            if existing.status == ReservationStatus::Cancelled {
                return Ok(UpsertOutcome::AlreadyCancelled);
            }
            item.created_at = existing.created_at;
        }
        state.items.insert(item.id.clone(), item);
        Ok(UpsertOutcome::Stored)
    }

    async fn get(&self, id: &str) -> Result<Option<ReservationItem>, TableError> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        Ok(state.items.get(id).cloned())
    }

    async fn update_status(
        &self,
        id: &str,
        status: ReservationStatus,
    ) -> Result<Option<ReservationItem>, TableError> {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if state.fail_on_write {
            return Err(TableError::Unavailable("write rejected".to_string()));
        }
        Ok(state.items.get_mut(id).map(|item| {
            item.status = status;
            item.updated_at = Utc::now();
            item.clone()
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(id: &str) -> ReservationItem {
        let now = Utc::now();
        ReservationItem {
            id: id.to_string(),
            status: ReservationStatus::Reserved,
            price: Money::from_cents(8999),
            attributes: Map::new(),
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn upsert_keeps_one_item_per_id() {
        let table = InMemoryReservationTable::new();
        let first = item("R-1");
        let created_at = first.created_at;

        table.upsert(first).await.unwrap();
        table.upsert(item("R-1")).await.unwrap();

        assert_eq!(table.item_count(), 1);
        let stored = table.get("R-1").await.unwrap().unwrap();
        assert_eq!(stored.created_at, created_at);
    }

    #[tokio::test]
    async fn update_status_of_missing_item() {
        let table = InMemoryReservationTable::new();
        let updated = table
            .update_status("nope", ReservationStatus::Cancelled)
            .await
            .unwrap();
        assert!(updated.is_none());
    }

    #[tokio::test]
    async fn cancel_transitions_status() {
        let table = InMemoryReservationTable::new();
        table.upsert(item("R-1")).await.unwrap();

        let updated = table
            .update_status("R-1", ReservationStatus::Cancelled)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(updated.status, ReservationStatus::Cancelled);
        assert_eq!(table.status_of("R-1"), Some(ReservationStatus::Cancelled));
        assert_eq!(table.reserved_count(), 0);
    }

    #[tokio::test]
    async fn cancelled_item_is_not_replaced() {
        let table = InMemoryReservationTable::new();
        table.upsert(item("R-1")).await.unwrap();
        table
            .update_status("R-1", ReservationStatus::Cancelled)
            .await
            .unwrap();

        let outcome = table.upsert(item("R-1")).await.unwrap();

        assert_eq!(outcome, UpsertOutcome::AlreadyCancelled);
        assert_eq!(table.status_of("R-1"), Some(ReservationStatus::Cancelled));
    }

    #[tokio::test]
    async fn failing_writes() {
        let table = InMemoryReservationTable::new();
        table.set_fail_on_write(true);
        assert!(table.upsert(item("R-1")).await.is_err());
        assert_eq!(table.item_count(), 0);
    }
}
