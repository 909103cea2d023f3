use crate::objstore::ObjectStore;
use crate::{ObjectInfo, Result};
use tracing::{debug, instrument};

/// Narrows a prefix listing down to the objects of interest
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "clap", derive(clap::Args))]
pub struct ListFilter {
    /// Only include keys ending with this suffix
    #[cfg_attr(feature = "clap", clap(long))]
    pub suffix: Option<String>,

    /// Only include keys at or after this one.  May be given relative to the prefix.
    #[cfg_attr(feature = "clap", clap(long))]
    pub start: Option<String>,

    /// Only include keys strictly before this one.  May be given relative to the prefix.
    #[cfg_attr(feature = "clap", clap(long))]
    pub end: Option<String>,

    /// Include at most this many objects
    #[cfg_attr(feature = "clap", clap(long))]
    pub limit: Option<usize>,
}

/// List the objects in `bucket` under `prefix` that pass `filter`, sorted by key.
#[instrument(skip(store))]
pub async fn list_matching(
    store: &dyn ObjectStore,
    bucket: &str,
    prefix: &str,
    filter: &ListFilter,
) -> Result<Vec<ObjectInfo>> {
    let mut objects = store.list_objects(bucket, prefix).await?;
    objects.sort_by(|a, b| a.key.cmp(&b.key));

    let start = filter.start.as_deref().map(|key| absolute_key(prefix, key));
    let end = filter.end.as_deref().map(|key| absolute_key(prefix, key));

    let matching = objects
        .into_iter()
        .filter(|object| start.as_deref().map_or(true, |start| object.key.as_str() >= start))
        .take_while(|object| end.as_deref().map_or(true, |end| object.key.as_str() < end))
        .filter(|object| {
            filter
                .suffix
                .as_deref()
                .map_or(true, |suffix| object.key.ends_with(suffix))
        })
        .take(filter.limit.unwrap_or(usize::MAX))
        .collect::<Vec<_>>();

    debug!(count = matching.len(), "Listed matching objects");

    Ok(matching)
}

/// Keys given to the filter may be relative to the prefix; make them absolute
fn absolute_key(prefix: &str, key: &str) -> String {
    if key.starts_with(prefix) {
        key.to_string()
    } else if prefix.is_empty() || prefix.ends_with('/') {
        format!("{prefix}{key}")
    } else {
        format!("{prefix}/{key}")
    }
}
