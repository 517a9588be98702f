//! Domain model for transfers.

mod transfer;

pub use transfer::{
    FailureCause, Transfer, TransferSnapshot, TransferSpec, TransferStatus,
};
