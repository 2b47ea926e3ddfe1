// REST poll source.
//
// One stateless GET per call. The body is decoded whatever the HTTP status,
// because backends report business errors (rate limits, missing resources)
// as error envelopes on 4xx/5xx responses.

use std::sync::Arc;

use futures_util::future::BoxFuture;
use reqwest::header::{ACCEPT, AUTHORIZATION};

use crate::envelope::{self, DecodedEnvelope};
use crate::error::Error;
use crate::transport::ClientContext;

/// Placeholder replaced by the resource id in poll path templates.
pub const ID_PLACEHOLDER: &str = "{id}";

/// Substitute `resource_id` into `template` as exactly one path segment.
///
/// The id is percent-encoded, so `/`, `?` and `#` cannot reshape the URL.
/// Empty ids and the dot segments `.` / `..` are rejected.
pub fn expand_template(template: &str, resource_id: &str) -> Result<String, Error> {
    if matches!(resource_id, "" | "." | "..") {
        return Err(Error::InvalidResourceId(resource_id.to_owned()));
    }
    Ok(template.replace(ID_PLACEHOLDER, &urlencoding::encode(resource_id)))
}

/// Fetches one full snapshot of a resource.
pub trait PollSource: Send + Sync + 'static {
    fn fetch(&self, resource_id: &str) -> BoxFuture<'static, Result<DecodedEnvelope, Error>>;
}

/// Polls `GET {base_url}/{path_template}` with `{id}` substituted.
#[derive(Clone)]
pub struct RestPollSource {
    http: reqwest::Client,
    context: Arc<ClientContext>,
    path_template: String,
}

impl RestPollSource {
    pub fn new(context: Arc<ClientContext>, path_template: impl Into<String>) -> Result<Self, Error> {
        let http = context.build_http_client()?;
        Ok(Self::with_client(http, context, path_template))
    }

    /// Build with a pre-configured `reqwest::Client`.
    pub fn with_client(
        http: reqwest::Client,
        context: Arc<ClientContext>,
        path_template: impl Into<String>,
    ) -> Self {
        Self {
            http,
            context,
            path_template: path_template.into(),
        }
    }

    /// Resolve the poll URL for one resource.
    pub fn url_for(&self, resource_id: &str) -> Result<url::Url, Error> {
        let path = expand_template(&self.path_template, resource_id)?;
        self.context.resolve(&path)
    }
}

impl PollSource for RestPollSource {
    fn fetch(&self, resource_id: &str) -> BoxFuture<'static, Result<DecodedEnvelope, Error>> {
        let url = self.url_for(resource_id);
        let http = self.http.clone();
        let auth = self.context.authorization();

        Box::pin(async move {
            let url = url?;
            tracing::debug!(url = %url, "GET (poll)");

            let mut request = http.get(url.clone()).header(ACCEPT, "application/json");
            if let Some(auth) = auth {
                request = request.header(AUTHORIZATION, auth);
            }

            let response = request.send().await?;
            let status = response.status();
            let body = response.bytes().await?;
            let decoded = envelope::decode_bytes(&body);

            if !status.is_success() {
                tracing::debug!(
                    status = status.as_u16(),
                    success = decoded.is_success(),
                    "poll returned non-2xx status"
                );
            }
            Ok(decoded)
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use url::Url;

    #[test]
    fn url_template_substitutes_id() {
        let ctx = Arc::new(ClientContext::new(Url::parse("https://backend.test/api").unwrap()));
        let source = RestPollSource::new(ctx, "/sessions/{id}").unwrap();
        assert_eq!(
            source.url_for("sess-9").unwrap().as_str(),
            "https://backend.test/api/sessions/sess-9"
        );
    }

    #[test]
    fn ids_cannot_escape_their_path_segment() {
        let ctx = Arc::new(ClientContext::new(Url::parse("https://backend.test/api").unwrap()));
        let source = RestPollSource::new(ctx, "/sessions/{id}").unwrap();

        let url = source.url_for("a/../b?admin=1#x").unwrap();
        assert_eq!(url.path(), "/api/sessions/a%2F..%2Fb%3Fadmin%3D1%23x");
        assert_eq!(url.query(), None);
        assert_eq!(url.fragment(), None);

        assert_eq!(
            source.url_for("rack 4").unwrap().as_str(),
            "https://backend.test/api/sessions/rack%204"
        );

        for bad in ["", ".", ".."] {
            assert!(matches!(source.url_for(bad), Err(Error::InvalidResourceId(_))));
        }
    }
}
