pub mod consumer;
pub mod finalizer;
pub mod intake;
pub mod outbox;
pub mod retry;
pub mod settlement;

pub use consumer::{HandleError, MessageHandler, StreamConsumer};
pub use finalizer::{FinalizeOutcome, TransactionFinalizer};
pub use intake::{IntakeError, OrderIntake};
pub use outbox::OutboxRelay;
pub use retry::RetryPolicy;
pub use settlement::SettlementWorker;
