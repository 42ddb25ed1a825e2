//! HTTP collaborators for the chat client: account login (fetching the
//! session cookie the PM server requires) and avatar upload.
//!
//! These are plain request/response calls with no protocol state; the
//! wire-protocol client consumes them as black boxes.

use std::path::Path;

use thiserror::Error;

const LOGIN_URL: &str = "http://chatango.com/login";
const PROFILE_URL: &str = "http://chatango.com/updateprofile";
const AUTH_COOKIE: &str = "auth.chatango.com=";

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("http request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("login response carried no auth cookie")]
    NoCookie,
    #[error("unsupported image type {0:?}")]
    UnsupportedImage(String),
    #[error("could not read {path}: {source}")]
    FileRead {
        path: String,
        source: std::io::Error,
    },
}

/// Request the auth cookie used by the private-message handshake.
pub async fn pm_auth(username: &str, password: &str) -> Result<String, AuthError> {
    let response = reqwest::Client::new()
        .post(LOGIN_URL)
        .form(&[
            ("user_id", username),
            ("password", password),
            ("storecookie", "on"),
            ("checkerrors", "yes"),
        ])
        .send()
        .await?;

    for value in response.headers().get_all("set-cookie") {
        let Ok(cookie) = value.to_str() else {
            continue;
        };
        if let Some(tail) = cookie.find(AUTH_COOKIE).map(|i| &cookie[i + AUTH_COOKIE.len()..]) {
            let token = tail.split(';').next().unwrap_or("");
            if !token.is_empty() {
                return Ok(token.to_string());
            }
        }
    }

    tracing::debug!("login succeeded but no auth cookie was set");
    Err(AuthError::NoCookie)
}

/// Normalise a filename extension to the image subtype the profile
/// endpoint accepts. Only `png` and `jpeg` are allowed; `jpg` is an alias.
fn image_subtype(extension: &str) -> Result<&'static str, AuthError> {
    match extension.to_ascii_lowercase().as_str() {
        "png" => Ok("png"),
        "jpg" | "jpeg" => Ok("jpeg"),
        other => Err(AuthError::UnsupportedImage(other.to_string())),
    }
}

/// Upload a new avatar image via the profile-update endpoint.
pub async fn upload_avatar(
    username: &str,
    password: &str,
    path: impl AsRef<Path>,
) -> Result<(), AuthError> {
    let path = path.as_ref();
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default();
    let subtype = image_subtype(extension)?;

    let data = tokio::fs::read(path).await.map_err(|source| AuthError::FileRead {
        path: path.display().to_string(),
        source,
    })?;

    let filename = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("avatar")
        .to_string();

    let file = reqwest::multipart::Part::bytes(data)
        .file_name(filename)
        .mime_str(&format!("image/{subtype}"))?;
    let form = reqwest::multipart::Form::new()
        .text("u", username.to_string())
        .text("p", password.to_string())
        .text("auth", "pwd")
        .text("arch", "h5")
        .text("src", "group")
        .text("action", "fullpic")
        .part("Filedata", file);

    reqwest::Client::new()
        .post(PROFILE_URL)
        .multipart(form)
        .send()
        .await?
        .error_for_status()?;

    tracing::debug!(user = username, "avatar uploaded");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jpg_normalises_to_jpeg() {
        assert_eq!(image_subtype("jpg").unwrap(), "jpeg");
        assert_eq!(image_subtype("JPEG").unwrap(), "jpeg");
        assert_eq!(image_subtype("png").unwrap(), "png");
    }

    #[test]
    fn other_image_types_rejected() {
        assert!(matches!(
            image_subtype("gif"),
            Err(AuthError::UnsupportedImage(_))
        ));
        assert!(matches!(image_subtype(""), Err(AuthError::UnsupportedImage(_))));
    }
}
