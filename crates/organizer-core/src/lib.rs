//! Core abstractions for the academic organizer: the secure storage contract
//! and its error taxonomy. Concrete encryption lives in `organizer-storage`.

pub mod storage;
