//! Share-target endpoint: turns shared content into an in-app search.

use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use url::form_urlencoded;

use crate::config::Config;
use crate::http::{Request, Response};

/// Characters escaped in a query component: everything except
/// `A-Z a-z 0-9 - _ . ! ~ * ' ( )`.
const QUERY_COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
  .remove(b'-')
  .remove(b'_')
  .remove(b'.')
  .remove(b'!')
  .remove(b'~')
  .remove(b'*')
  .remove(b'\'')
  .remove(b'(')
  .remove(b')');

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SharedContent {
  pub title: String,
  pub text: String,
  pub url: String,
}

impl SharedContent {
  /// Parse a form-encoded share body. Missing fields are empty.
  pub fn parse(body: &[u8]) -> Self {
    let mut content = Self::default();
    for (name, value) in form_urlencoded::parse(body) {
      match name.as_ref() {
        "title" => content.title = value.into_owned(),
        "text" => content.text = value.into_owned(),
        "url" => content.url = value.into_owned(),
        _ => {}
      }
    }
    content
  }

  /// Search query built from the shared title and text.
  pub fn search_query(&self) -> String {
    format!("{} {}", self.title, self.text).trim().to_string()
  }
}

/// Whether the request targets the share endpoint.
pub fn is_share_request(config: &Config, request: &Request) -> bool {
  request.method == "POST" && request.url.path() == config.share.path
}

/// Redirect into the app with the shared content as a search query.
pub fn handle(config: &Config, request: &Request) -> Response {
  let content = SharedContent::parse(&request.body);
  let location = format!(
    "{}?search={}",
    config.shell.document,
    utf8_percent_encode(&content.search_query(), QUERY_COMPONENT)
  );
  Response::redirect(&location, 302)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::testing;

  fn share(body: &str) -> Request {
    Request::new("POST", testing::url("/share-target")).with_body(body)
  }

  #[test]
  fn test_redirects_with_encoded_query() {
    let config = testing::config();
    let resp = handle(&config, &share("title=Goa+beaches&text=best%20in%20May&url=https%3A%2F%2Fx.example"));

    assert_eq!(resp.status, 302);
    assert_eq!(
      resp.header("location"),
      Some("/ultimate-travel-app.html?search=Goa%20beaches%20best%20in%20May")
    );
  }

  #[test]
  fn test_query_keeps_unreserved_punctuation() {
    let config = testing::config();
    let resp = handle(&config, &share("title=Goa!&text=(beaches)+%27n%27+*forts*+~&url="));
    assert_eq!(
      resp.header("location"),
      Some("/ultimate-travel-app.html?search=Goa!%20(beaches)%20'n'%20*forts*%20~")
    );

    let resp = handle(&config, &share("text=caf%C3%A9+%26+chai%3F"));
    assert_eq!(
      resp.header("location"),
      Some("/ultimate-travel-app.html?search=caf%C3%A9%20%26%20chai%3F")
    );
  }

  #[test]
  fn test_missing_fields_are_empty() {
    let config = testing::config();
    let resp = handle(&config, &share("text=Lonavala"));
    assert_eq!(
      resp.header("location"),
      Some("/ultimate-travel-app.html?search=Lonavala")
    );

    let resp = handle(&config, &share(""));
    assert_eq!(resp.header("location"), Some("/ultimate-travel-app.html?search="));
  }

  #[test]
  fn test_parse_keeps_url_field() {
    let content = SharedContent::parse(b"url=https%3A%2F%2Fx.example%2Fa&title=T");
    assert_eq!(content.url, "https://x.example/a");
    assert_eq!(content.search_query(), "T");
  }

  #[test]
  fn test_only_post_to_share_path_matches() {
    let config = testing::config();
    assert!(is_share_request(&config, &share("")));
    assert!(!is_share_request(&config, &Request::get(testing::url("/share-target"))));
    assert!(!is_share_request(
      &config,
      &Request::new("POST", testing::url("/other"))
    ));
  }
}
