//! Catalog resolution inside an order transaction.

use std::collections::{BTreeSet, HashMap};
use crate::domain::aggregates::Product;
use crate::store::OrderTx;
use crate::{Result, StorefrontError};

/// Reads the authoritative row for every requested product through `tx`.
///
/// Rows are locked in ascending id order so two orders touching the same
/// products cannot deadlock. A single missing id fails the whole lookup.
pub async fn resolve_many(tx: &mut dyn OrderTx, product_ids: impl IntoIterator<Item = i64>) -> Result<HashMap<i64, Product>> {
    let ids: BTreeSet<i64> = product_ids.into_iter().collect();
    let mut products = HashMap::with_capacity(ids.len());
    for id in ids {
        let product = tx.lock_product(id).await?.ok_or(StorefrontError::ProductNotFound(id))?;
        products.insert(id, product);
    }
    Ok(products)
}
