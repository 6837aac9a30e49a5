//! Transaction tracking
//!
//! The instrumentation layer does not wrap driver transactions (that belongs
//! to the ORM/application layer); it tracks which transaction is current on a
//! connection so statements can snapshot the transaction id they ran under,
//! and enforces the one-active-transaction-per-connection invariant.

use parking_lot::Mutex;
use std::sync::Arc;

use crate::user_data::UserData;

/// Outcome state of a tracked transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionStatus {
    /// Begun and not yet finished
    Active,
    /// Finished with a commit
    Committed,
    /// Finished with a rollback
    RolledBack,
}

struct TransactionState {
    id: String,
    seq_no: u64,
    data_source_id: String,
    connection_id: Option<String>,
    started_at_nanos: i64,
    status: Mutex<TransactionStatus>,
    user_data: UserData,
}

/// Shareable reference to one tracked transaction
///
/// Handles stay valid after the transaction finishes; [`status`](Self::status)
/// reports how it ended.
#[derive(Clone)]
pub struct TransactionHandle {
    state: Arc<TransactionState>,
}

impl TransactionHandle {
    pub(crate) fn new(
        id: String,
        seq_no: u64,
        data_source_id: String,
        connection_id: Option<String>,
        started_at_nanos: i64,
    ) -> Self {
        Self {
            state: Arc::new(TransactionState {
                id,
                seq_no,
                data_source_id,
                connection_id,
                started_at_nanos,
                status: Mutex::new(TransactionStatus::Active),
                user_data: UserData::new(),
            }),
        }
    }

    /// The generated transaction identifier
    pub fn id(&self) -> &str {
        &self.state.id
    }

    /// Sequence number of this transaction within its data source
    pub fn seq_no(&self) -> u64 {
        self.state.seq_no
    }

    /// The data source this transaction belongs to
    pub fn data_source_id(&self) -> &str {
        &self.state.data_source_id
    }

    /// The id of the connection the transaction began on
    pub fn connection_id(&self) -> Option<&str> {
        self.state.connection_id.as_deref()
    }

    /// Nanoseconds since the Unix epoch when the transaction began
    pub fn started_at_nanos(&self) -> i64 {
        self.state.started_at_nanos
    }

    /// Current status
    pub fn status(&self) -> TransactionStatus {
        *self.state.status.lock()
    }

    /// Whether the transaction has not yet finished
    pub fn is_active(&self) -> bool {
        self.status() == TransactionStatus::Active
    }

    /// User data attached to this transaction
    pub fn user_data(&self) -> &UserData {
        &self.state.user_data
    }

    pub(crate) fn finish(&self, committed: bool) {
        *self.state.status.lock() = if committed {
            TransactionStatus::Committed
        } else {
            TransactionStatus::RolledBack
        };
    }

    pub(crate) fn same_as(&self, other: &TransactionHandle) -> bool {
        Arc::ptr_eq(&self.state, &other.state)
    }
}

impl std::fmt::Debug for TransactionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionHandle")
            .field("id", &self.state.id)
            .field("data_source", &self.state.data_source_id)
            .field("status", &self.status())
            .finish()
    }
}
