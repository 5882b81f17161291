//! sled-backed persistence
//!
//! Every record lives in its own tree and is encoded with minicbor. Mutations go through
//! sled transactions spanning exactly the trees they touch; a business rejection aborts
//! the transaction so nothing half-applied is ever written.
use std::path::Path;
use std::sync::Arc;

use sled::transaction::{
    ConflictableTransactionError, ConflictableTransactionResult, TransactionError,
    TransactionResult, TransactionalTree,
};
use sled::{Db, Tree};

use crate::error::StoreError;

/// A value persisted in one of the store's trees.
pub trait Record: minicbor::Encode<()> + for<'b> minicbor::Decode<'b, ()> {
    const KIND: &'static str;
}

#[derive(Clone)]
pub struct Store {
    db: Arc<Db>,
    pub(crate) orders: Tree,
    pub(crate) returns: Tree,
    pub(crate) return_history: Tree,
    pub(crate) open_returns: Tree,
    pub(crate) idempotency: Tree,
    pub(crate) coupons: Tree,
    pub(crate) coupon_codes: Tree,
    pub(crate) coupon_by_return: Tree,
}

impl Store {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let db = sled::open(path)?;
        Self::new(Arc::new(db))
    }

    pub fn new(db: Arc<Db>) -> Result<Self, StoreError> {
        Ok(Self {
            orders: db.open_tree("orders")?,
            returns: db.open_tree("returns")?,
            return_history: db.open_tree("return_history")?,
            open_returns: db.open_tree("open_returns")?,
            idempotency: db.open_tree("idempotency")?,
            coupons: db.open_tree("coupons")?,
            coupon_codes: db.open_tree("coupon_codes")?,
            coupon_by_return: db.open_tree("coupon_by_return")?,
            db,
        })
    }

    pub fn flush(&self) -> Result<(), StoreError> {
        self.db.flush()?;
        Ok(())
    }
}

pub(crate) fn encode<T: Record>(value: &T) -> Result<Vec<u8>, StoreError> {
    minicbor::to_vec(value).map_err(|e| StoreError::Encode(T::KIND, e.to_string()))
}

pub(crate) fn decode<T: Record>(bytes: &[u8]) -> Result<T, StoreError> {
    minicbor::decode(bytes).map_err(|e| StoreError::Decode(T::KIND, e.to_string()))
}

pub(crate) fn get<T: Record>(tree: &Tree, key: &[u8]) -> Result<Option<T>, StoreError> {
    match tree.get(key)? {
        Some(bytes) => decode(&bytes).map(Some),
        None => Ok(None),
    }
}

pub(crate) fn get_id(tree: &Tree, key: &[u8]) -> Result<Option<String>, StoreError> {
    match tree.get(key)? {
        Some(bytes) => utf8(&bytes).map(Some),
        None => Ok(None),
    }
}

/// Decode every value in a tree that passes `keep`.
pub(crate) fn scan<T: Record>(
    tree: &Tree,
    keep: impl Fn(&T) -> bool,
) -> Result<Vec<T>, StoreError> {
    let mut out = Vec::new();
    for entry in tree.iter() {
        let (_, bytes) = entry?;
        let record: T = decode(&bytes)?;
        if keep(&record) {
            out.push(record);
        }
    }
    Ok(out)
}

fn utf8(bytes: &[u8]) -> Result<String, StoreError> {
    String::from_utf8(bytes.to_vec()).map_err(|e| StoreError::Decode("index", e.to_string()))
}

pub(crate) fn abort<T, E>(err: impl Into<E>) -> ConflictableTransactionResult<T, E> {
    Err(ConflictableTransactionError::Abort(err.into()))
}

pub(crate) fn tx_get<T: Record, E: From<StoreError>>(
    tree: &TransactionalTree,
    key: &[u8],
) -> ConflictableTransactionResult<Option<T>, E> {
    match tree.get(key)? {
        Some(bytes) => match decode(&bytes) {
            Ok(record) => Ok(Some(record)),
            Err(e) => abort(e),
        },
        None => Ok(None),
    }
}

pub(crate) fn tx_get_id<E: From<StoreError>>(
    tree: &TransactionalTree,
    key: &[u8],
) -> ConflictableTransactionResult<Option<String>, E> {
    match tree.get(key)? {
        Some(bytes) => match utf8(&bytes) {
            Ok(id) => Ok(Some(id)),
            Err(e) => abort(e),
        },
        None => Ok(None),
    }
}

pub(crate) fn tx_put<T: Record, E: From<StoreError>>(
    tree: &TransactionalTree,
    key: &[u8],
    value: &T,
) -> ConflictableTransactionResult<(), E> {
    match encode(value) {
        Ok(bytes) => {
            tree.insert(key, bytes)?;
            Ok(())
        }
        Err(e) => abort(e),
    }
}

/// Collapse a finished transaction into the caller's error type.
pub(crate) fn settle<T, E: From<StoreError>>(result: TransactionResult<T, E>) -> Result<T, E> {
    match result {
        Ok(value) => Ok(value),
        Err(TransactionError::Abort(e)) => Err(e),
        Err(TransactionError::Storage(e)) => Err(StoreError::from(e).into()),
    }
}
