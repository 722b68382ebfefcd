// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Paged list helper for Kubernetes API list operations.
//!
//! Host tables are rebuilt from full Service and pod listings, which can be large in
//! busy namespaces. Listing in pages keeps individual API responses small.

use crate::constants::KUBE_LIST_PAGE_SIZE;
use kube::{api::ListParams, Api, Resource};
use serde::de::DeserializeOwned;
use std::fmt::Debug;
use tracing::debug;

/// List all resources matching `list_params`, following continue tokens.
///
/// # Errors
///
/// Returns the first Kubernetes API error encountered.
pub async fn list_all_paginated<K>(
    api: &Api<K>,
    mut list_params: ListParams,
) -> Result<Vec<K>, kube::Error>
where
    K: Resource<DynamicType = ()> + Clone + DeserializeOwned + Debug,
{
    list_params.limit = Some(KUBE_LIST_PAGE_SIZE);

    let mut all_items = Vec::new();
    let mut page_count = 0;

    loop {
        page_count += 1;
        let result = api.list(&list_params).await?;
        all_items.extend(result.items);

        match result.metadata.continue_ {
            Some(token) if !token.is_empty() => list_params.continue_token = Some(token),
            _ => break,
        }
    }

    debug!(
        kind = %K::kind(&()),
        total_pages = page_count,
        total_items = all_items.len(),
        "Completed paginated list"
    );

    Ok(all_items)
}

/// Build list parameters for a label selector, leaving the selector unset when empty.
#[must_use]
pub fn label_list_params(selector: &str) -> ListParams {
    if selector.is_empty() {
        ListParams::default()
    } else {
        ListParams::default().labels(selector)
    }
}

#[cfg(test)]
#[path = "pagination_tests.rs"]
mod pagination_tests;
