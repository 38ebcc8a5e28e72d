pub mod directory;
pub mod dispatcher;
pub mod ledger;
pub mod router;
pub mod transport;

pub use directory::{RecipientDirectory, StaffMember, StaticDirectory};
pub use dispatcher::AlertDispatcher;
pub use ledger::AlertLedger;
pub use router::AlertRouter;
pub use transport::{AlertTransport, AmqpAlertTransport, LogTransport};
