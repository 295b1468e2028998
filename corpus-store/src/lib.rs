pub mod fragment;
pub mod ledger;
pub mod manager;
pub mod store;

pub use fragment::{CorpusStats, DocumentRecord, Fragment};
pub use ledger::DocumentLedger;
pub use manager::{CorpusManager, Retriever};
pub use store::FragmentStore;
