//! Thin client for a NeteaseCloudMusicApi compatible server.
//!
//! Every endpoint takes an already logged-in cookie; logging in is left to the user.

use reqwest::RequestBuilder;
use reqwest::header::COOKIE;

pub mod cloud;
pub mod lyric;
pub mod playlist;
pub mod song_url;

/// Attach the account cookie, if there is one
fn with_cookie(request: RequestBuilder, cookie: &str) -> RequestBuilder {
    if cookie.is_empty() {
        request
    } else {
        request.header(COOKIE, cookie)
    }
}
