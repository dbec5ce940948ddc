//! Apply engine
//!
//! StatefulSets and Services go through server-side apply under the fixed
//! `moco-controller` field manager. Before writing, the desired
//! configuration is extracted from the live object tree and compared; when
//! the live object already carries every field we would apply, the write is
//! skipped entirely. Unconditional applies would bump resourceVersions on
//! every reconcile and cascade into pod rollouts.
//!
//! Simpler objects use a get-or-create-then-mutate pattern that merges the
//! operator's form over whatever labels and annotations users placed on the
//! object, and replaces it only when the result diverges.

use kube::api::{Api, DeleteParams, Patch, PatchParams, PostParams};
use kube::ResourceExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::debug;

use crate::controller::error::{Error, Result};
use crate::resources::common::FIELD_MANAGER;

/// Apply `desired` with server-side apply, short-circuiting when the live
/// object already matches. `live` is the caller's fetched copy, if any.
///
/// Returns true when a write was performed.
pub async fn apply_ssa<T>(api: &Api<T>, desired: &T, live: Option<&T>) -> Result<bool>
where
    T: kube::Resource + Clone + DeserializeOwned + Serialize + std::fmt::Debug,
{
    let name = desired.name_any();

    if let Some(live) = live {
        let desired_value = serde_json::to_value(desired)?;
        let live_value = serde_json::to_value(live)?;
        if extract_configuration(&live_value, &desired_value) == desired_value {
            debug!("skipping apply of {}: no change", name);
            return Ok(false);
        }
    }

    let params = PatchParams::apply(FIELD_MANAGER).force();
    api.patch(&name, &params, &Patch::Apply(desired)).await?;
    debug!("applied {}", name);
    Ok(true)
}

/// Create `desired`, or merge it over the existing object and replace it if
/// anything we manage diverges.
///
/// Returns true when a write was performed.
pub async fn update_or_create<T>(api: &Api<T>, desired: &T) -> Result<bool>
where
    T: kube::Resource + Clone + DeserializeOwned + Serialize + std::fmt::Debug,
{
    let name = desired.name_any();

    let Some(live) = api.get_opt(&name).await? else {
        api.create(&PostParams::default(), desired).await?;
        debug!("created {}", name);
        return Ok(true);
    };

    ensure_not_foreign(&live, desired)?;

    let mut updated = desired.clone();
    {
        let live_meta = live.meta().clone();
        let meta = updated.meta_mut();
        meta.resource_version = live_meta.resource_version.clone();
        meta.uid = live_meta.uid.clone();
        meta.labels = merge_string_maps(live_meta.labels, meta.labels.take());
        meta.annotations = merge_string_maps(live_meta.annotations, meta.annotations.take());
        if meta.owner_references.is_none() {
            meta.owner_references = live_meta.owner_references;
        }
    }

    let desired_value = serde_json::to_value(&updated)?;
    let live_value = serde_json::to_value(&live)?;
    if extract_configuration(&live_value, &desired_value) == desired_value {
        debug!("skipping update of {}: no change", name);
        return Ok(false);
    }

    api.replace(&name, &PostParams::default(), &updated).await?;
    debug!("updated {}", name);
    Ok(true)
}

/// Delete an object, treating an already-gone object as success.
///
/// Returns true when the object existed.
pub async fn delete_ignore_not_found<T>(api: &Api<T>, name: &str) -> Result<bool>
where
    T: Clone + DeserializeOwned + std::fmt::Debug,
{
    match api.delete(name, &DeleteParams::default()).await {
        Ok(_) => {
            debug!("deleted {}", name);
            Ok(true)
        }
        Err(kube::Error::Api(e)) if e.code == 404 => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Refuse to adopt an object controlled by someone else.
fn ensure_not_foreign<T>(live: &T, desired: &T) -> Result<()>
where
    T: kube::Resource,
{
    let live_controller = live
        .meta()
        .owner_references
        .as_deref()
        .unwrap_or_default()
        .iter()
        .find(|r| r.controller == Some(true));
    let desired_controller = desired
        .meta()
        .owner_references
        .as_deref()
        .unwrap_or_default()
        .iter()
        .find(|r| r.controller == Some(true));

    if let (Some(live_ref), Some(desired_ref)) = (live_controller, desired_controller) {
        if live_ref.uid != desired_ref.uid {
            return Err(Error::ForeignOwner(desired.name_any()));
        }
    }
    Ok(())
}

fn merge_string_maps(
    live: Option<BTreeMap<String, String>>,
    desired: Option<BTreeMap<String, String>>,
) -> Option<BTreeMap<String, String>> {
    match (live, desired) {
        (None, desired) => desired,
        (live, None) => live,
        (Some(mut merged), Some(desired)) => {
            merged.extend(desired);
            Some(merged)
        }
    }
}

/// Project the fields present in `desired` out of `live`.
///
/// When the result equals `desired`, every field we would apply already has
/// its desired value and the write can be skipped. Arrays are compared
/// positionally; a length difference conservatively reports divergence,
/// which at worst causes a redundant (idempotent) apply.
fn extract_configuration(live: &Value, desired: &Value) -> Value {
    match (live, desired) {
        (Value::Object(live_map), Value::Object(desired_map)) => Value::Object(
            desired_map
                .iter()
                .map(|(key, desired_value)| {
                    let extracted = match live_map.get(key) {
                        Some(live_value) => extract_configuration(live_value, desired_value),
                        None => Value::Null,
                    };
                    (key.clone(), extracted)
                })
                .collect(),
        ),
        (Value::Array(live_items), Value::Array(desired_items)) => {
            if live_items.len() != desired_items.len() {
                return live.clone();
            }
            Value::Array(
                live_items
                    .iter()
                    .zip(desired_items)
                    .map(|(live_item, desired_item)| {
                        extract_configuration(live_item, desired_item)
                    })
                    .collect(),
            )
        }
        _ => live.clone(),
    }
}
