//! Token-paginated listing
//!
//! List endpoints return one page plus an opaque `next_page_token`; the
//! helpers here follow the token until the service stops returning one.

use super::client::{encode, get, WorkspaceClient};
use crate::error::Result;
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;

/// One page of a list response
pub trait Paginated: DeserializeOwned {
    type Item;

    /// Split the page into its items and the token of the next page
    fn into_page(self) -> (Vec<Self::Item>, Option<String>);
}

/// Append a page token to a list path
fn page_path(path: &str, token_param: &str, token: Option<&str>) -> String {
    match token {
        Some(token) => {
            let separator = if path.contains('?') { '&' } else { '?' };
            format!("{}{}{}={}", path, separator, token_param, encode(token))
        },
        None => path.to_string(),
    }
}

/// Fetch all items (auto-paginate)
///
/// `token_param` is the query parameter the endpoint expects the token in
/// (`page_token` for clusters, `next_page_token` for repos).
pub async fn fetch_all_pages<P: Paginated>(
    client: &dyn WorkspaceClient,
    path: &str,
    token_param: &str,
    cancel: &CancellationToken,
) -> Result<Vec<P::Item>> {
    let mut all_items = Vec::new();
    let mut page_token: Option<String> = None;
    let mut pages = 0usize;

    loop {
        let url = page_path(path, token_param, page_token.as_deref());
        let page: P = get(client, &url, cancel).await?;
        let (items, next_token) = page.into_page();
        pages += 1;
        all_items.extend(items);

        match next_token {
            Some(token) if !token.is_empty() && Some(&token) != page_token.as_ref() => {
                page_token = Some(token);
            },
            _ => break,
        }
    }

    tracing::debug!("Fetched {} items from {} in {} page(s)", all_items.len(), path, pages);
    Ok(all_items)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_page_has_no_token() {
        assert_eq!(page_path("2.0/repos", "next_page_token", None), "2.0/repos");
    }

    #[test]
    fn token_is_encoded_into_query() {
        assert_eq!(
            page_path("2.1/clusters/list", "page_token", Some("a b")),
            "2.1/clusters/list?page_token=a%20b"
        );
        assert_eq!(
            page_path("2.0/repos?path_prefix=%2FRepos", "next_page_token", Some("t1")),
            "2.0/repos?path_prefix=%2FRepos&next_page_token=t1"
        );
    }
}
