use std::sync::Arc;

use tracing::warn;

use einvoice_transfer::{Exchange, ExchangeObserver};

use crate::store::{AuditEntry, InvoiceStore};

/// Records every remote exchange in the store's audit log.
///
/// Audit failures are logged and swallowed; they never fail the exchange.
pub struct AuditingObserver {
    store: Arc<dyn InvoiceStore>,
}

impl AuditingObserver {
    pub fn new(store: Arc<dyn InvoiceStore>) -> Self {
        Self { store }
    }
}

impl ExchangeObserver for AuditingObserver {
    fn on_exchange(&self, exchange: &Exchange) {
        let mut entry = AuditEntry::new(exchange.operation, exchange.subject.clone(), exchange.success);
        entry.error = exchange.error.clone();
        entry.raw_response = exchange.raw_response.clone();
        if let Err(err) = self.store.append_audit(entry) {
            warn!(operation = exchange.operation, error = %err, "failed to record audit entry");
        }
    }
}
