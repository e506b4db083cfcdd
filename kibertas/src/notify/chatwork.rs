use super::{NotificationTransport, NotifyError};
use crate::config::Env;
use crate::http::reqwest::try_build_reqwest_client;
use reqwest::blocking::Client;
use tracing::debug;

pub const API_TOKEN_ENV: &str = "CHATWORK_API_TOKEN";
pub const ROOM_ID_ENV: &str = "CHATWORK_ROOM_ID";
pub const SITE_ENV: &str = "CHATWORK_SITE";
pub const DEFAULT_SITE: &str = "api.chatwork.com";

const TOKEN_HEADER: &str = "X-ChatWorkToken";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatworkConfig {
    pub api_token: String,
    pub room_id: String,
    /// Host of the API, a full base url (`http://...`) is used as is.
    pub site: String,
}

impl ChatworkConfig {
    /// Returns `None` unless both the token and the room are set.
    pub fn from_env(env: &Env) -> Option<Self> {
        Some(Self {
            api_token: env.get(API_TOKEN_ENV)?,
            room_id: env.get(ROOM_ID_ENV)?,
            site: env.get_or(SITE_ENV, DEFAULT_SITE),
        })
    }

    fn messages_url(&self) -> String {
        let base_url = if self.site.contains("://") {
            self.site.trim_end_matches('/').to_string()
        } else {
            format!("https://{}", self.site)
        };
        format!("{base_url}/v2/rooms/{}/messages", self.room_id)
    }
}

/// Posts notifications as messages in a Chatwork room.
pub struct ChatworkTransport {
    client: Client,
    url: String,
    api_token: String,
}

impl ChatworkTransport {
    pub fn try_new(config: ChatworkConfig) -> Result<Self, NotifyError> {
        let client = try_build_reqwest_client().map_err(|err| NotifyError::Build(err.to_string()))?;
        Ok(Self {
            client,
            url: config.messages_url(),
            api_token: config.api_token,
        })
    }
}

impl NotificationTransport for ChatworkTransport {
    fn send(&self, message: &str) -> Result<(), NotifyError> {
        debug!(url = %self.url, "Posting Chatwork message");
        let response = self
            .client
            .post(&self.url)
            .header(TOKEN_HEADER, &self.api_token)
            .form(&[("body", message)])
            .send()
            .map_err(|err| NotifyError::Send(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(NotifyError::Status(status.as_u16()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use httpmock::{Method::POST, MockServer};

    fn config(site: String) -> ChatworkConfig {
        ChatworkConfig {
            api_token: "token".to_string(),
            room_id: "1234".to_string(),
            site,
        }
    }

    #[test]
    fn test_config_from_env() {
        let pairs = [(API_TOKEN_ENV, "token"), (ROOM_ID_ENV, "1234")];
        let config = ChatworkConfig::from_env(&Env::from_pairs(&pairs)).unwrap();
        assert_eq!(config.site, DEFAULT_SITE);
        assert_eq!(
            config.messages_url(),
            "https://api.chatwork.com/v2/rooms/1234/messages"
        );

        let pairs = [(API_TOKEN_ENV, "token"), (ROOM_ID_ENV, "")];
        assert_eq!(ChatworkConfig::from_env(&Env::from_pairs(&pairs)), None);
    }

    #[test]
    fn test_send_message() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/v2/rooms/1234/messages")
                .header("X-ChatWorkToken", "token")
                .header("content-type", "application/x-www-form-urlencoded")
                .body("body=kibertas+start%0A");
            then.status(200).body(r#"{"message_id":"1"}"#);
        });

        let transport = ChatworkTransport::try_new(config(server.base_url())).unwrap();
        transport.send("kibertas start\n").unwrap();
        mock.assert();
    }

    #[test]
    fn test_send_message_rejected() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST).path("/v2/rooms/1234/messages");
            then.status(401);
        });

        let transport = ChatworkTransport::try_new(config(server.base_url())).unwrap();
        assert_matches!(transport.send("message"), Err(NotifyError::Status(401)));
        mock.assert();
    }
}
