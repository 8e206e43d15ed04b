use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};

use super::client::{Asset, AssetInventoryClient, ClientError, ListAssetsRequest};

enum PageState {
    First,
    Next(String),
    Exhausted,
}

/// Streams every asset matching `request`, following page tokens until the listing
/// is exhausted. The first error ends the stream.
pub fn asset_stream<'a>(
    client: &'a dyn AssetInventoryClient,
    request: &'a ListAssetsRequest,
) -> BoxStream<'a, Result<Asset, ClientError>> {
    stream::try_unfold(PageState::First, move |state| async move {
        let token = match state {
            PageState::First => None,
            PageState::Next(token) => Some(token),
            PageState::Exhausted => return Ok::<_, ClientError>(None),
        };

        let page = client.list_page(request, token.as_deref()).await?;
        let next = match page.next_page_token {
            Some(token) => PageState::Next(token),
            None => PageState::Exhausted,
        };
        Ok(Some((stream::iter(page.assets.into_iter().map(Ok)), next)))
    })
    .try_flatten()
    .boxed()
}
