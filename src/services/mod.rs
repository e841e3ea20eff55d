// Service modules
pub mod ingestor;
pub mod reconciler;
pub mod verifier;

pub use ingestor::EventIngestor;
pub use reconciler::EntitlementReconciler;
pub use verifier::ReceiptVerifier;
