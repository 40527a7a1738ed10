//! Credential resolution for remote operations.
//!
//! The auth descriptor stores no secrets: ssh goes through the agent or a
//! key file, https tokens come from the environment.

use std::path::PathBuf;

use git2::{Cred, CredentialType, RemoteCallbacks};

use crate::config::{AuthConfig, AuthType};

pub(crate) fn remote_callbacks(auth: &AuthConfig) -> RemoteCallbacks<'static> {
    let auth = auth.clone();
    let mut callbacks = RemoteCallbacks::new();
    callbacks.credentials(move |_url, username_from_url, allowed| {
        credentials(&auth, username_from_url, allowed)
    });
    callbacks
}

fn credentials(
    auth: &AuthConfig,
    username_from_url: Option<&str>,
    allowed: CredentialType,
) -> Result<Cred, git2::Error> {
    let user = username_from_url.unwrap_or("git");
    match auth.auth_type {
        AuthType::None => Cred::default(),
        AuthType::Ssh => ssh_credentials(auth, user),
        AuthType::Basic => basic_credentials(auth),
        AuthType::Auto => {
            if allowed.is_ssh_key() {
                return ssh_credentials(auth, user);
            }
            if allowed.is_user_pass_plaintext() {
                if let Some(cred) = env_token() {
                    return cred;
                }
                if auth.username.is_some() {
                    return basic_credentials(auth);
                }
            }
            Cred::default()
        }
    }
}

fn ssh_credentials(auth: &AuthConfig, user: &str) -> Result<Cred, git2::Error> {
    if let Some(key) = &auth.ssh_key {
        return Cred::ssh_key(user, None, key, None);
    }
    Cred::ssh_key_from_agent(user).or_else(|agent_err| {
        let default_key = default_ssh_key();
        match default_key {
            Some(key) => Cred::ssh_key(user, None, &key, None),
            None => Err(agent_err),
        }
    })
}

fn default_ssh_key() -> Option<PathBuf> {
    let key = dirs::home_dir()?.join(".ssh").join("id_rsa");
    key.exists().then_some(key)
}

fn basic_credentials(auth: &AuthConfig) -> Result<Cred, git2::Error> {
    let username = auth
        .username
        .clone()
        .or_else(|| std::env::var("GIT_USERNAME").ok())
        .ok_or_else(|| git2::Error::from_str("username is required for basic authentication"))?;
    let password = std::env::var("GIT_PASSWORD").map_err(|_| {
        git2::Error::from_str("password is required for basic authentication (set GIT_PASSWORD)")
    })?;
    Cred::userpass_plaintext(&username, &password)
}

/// Well-known token variables, most specific first.
fn env_token() -> Option<Result<Cred, git2::Error>> {
    let pairs = [
        ("GITHUB_TOKEN", "token"),
        ("GITLAB_TOKEN", "oauth2"),
        ("GIT_TOKEN", "token"),
    ];
    for (var, username) in pairs {
        if let Ok(token) = std::env::var(var)
            && !token.is_empty()
        {
            return Some(Cred::userpass_plaintext(username, &token));
        }
    }
    if let (Ok(username), Ok(password)) =
        (std::env::var("GIT_USERNAME"), std::env::var("GIT_PASSWORD"))
        && !username.is_empty()
    {
        return Some(Cred::userpass_plaintext(&username, &password));
    }
    None
}
