//! Interpolation of a whole prepared request.

use super::engine::Interpolator;
use super::pathparams::interpolate_path_params;
use super::scopes::VariableScopes;
use crate::auth::oauth2::AdditionalParam;
use crate::auth::AuthMode;
use crate::base::neterror::NetError;
use crate::config::ProxyConfig;
use crate::request::{MultipartValue, PreparedRequest, ProxyMode, RequestBody};
use crate::socket::certs::CertificateSource;

/// Expand every template in `request` against `scopes`, then substitute
/// path params into the URL.
///
/// JSON and GraphQL bodies use JSON-escape mode; WebSocket messages do too
/// when they parse as JSON. Everything else is plain text.
pub fn interpolate_request(
    request: &mut PreparedRequest,
    scopes: &VariableScopes,
) -> Result<(), NetError> {
    let interp = Interpolator::new(scopes);
    let text = |s: &mut String| *s = interp.interpolate(s);

    text(&mut request.url);
    for (name, value) in request.headers.iter_mut() {
        text(name);
        text(value);
    }
    for param in &mut request.params {
        text(&mut param.value);
    }

    match &mut request.body {
        RequestBody::None => {}
        RequestBody::Json(s) => *s = interp.interpolate_json(s),
        RequestBody::Text(s) | RequestBody::Xml(s) | RequestBody::Sparql(s) => text(s),
        RequestBody::GraphQl { query, variables } => {
            text(query);
            *variables = interp.interpolate_json(variables);
        }
        RequestBody::FormUrlEncoded(fields) => {
            for field in fields {
                text(&mut field.name);
                text(&mut field.value);
            }
        }
        RequestBody::Multipart(fields) => {
            for field in fields {
                text(&mut field.name);
                match &mut field.value {
                    MultipartValue::Text(s) => text(s),
                    MultipartValue::Files(paths) => paths.iter_mut().for_each(text),
                }
            }
        }
        RequestBody::Ws(messages) => {
            for message in messages {
                message.content =
                    if serde_json::from_str::<serde_json::Value>(&message.content).is_ok() {
                        interp.interpolate_json(&message.content)
                    } else {
                        interp.interpolate(&message.content)
                    };
            }
        }
    }

    interpolate_auth(&mut request.auth, &interp);

    if let ProxyMode::On(config) = &mut request.proxy {
        interpolate_proxy(config, &interp);
    }
    for cert in &mut request.client_certificates {
        text(&mut cert.domain);
        if let Some(passphrase) = &mut cert.passphrase {
            text(passphrase);
        }
        match &mut cert.source {
            CertificateSource::Pem {
                cert_path,
                key_path,
            } => {
                text(cert_path);
                text(key_path);
            }
            CertificateSource::Pfx { pfx_path } => text(pfx_path),
        }
    }

    request.url = interpolate_path_params(&request.url, &request.params)?;
    Ok(())
}

fn interpolate_auth(auth: &mut AuthMode, interp: &Interpolator) {
    let text = |s: &mut String| *s = interp.interpolate(s);
    match auth {
        AuthMode::None | AuthMode::Inherit => {}
        AuthMode::Basic(a) => {
            text(&mut a.username);
            text(&mut a.password);
        }
        AuthMode::Bearer(a) => text(&mut a.token),
        AuthMode::Digest(a) => {
            text(&mut a.username);
            text(&mut a.password);
        }
        AuthMode::AwsV4(a) => {
            text(&mut a.access_key_id);
            text(&mut a.secret_access_key);
            text(&mut a.session_token);
            text(&mut a.service);
            text(&mut a.region);
            text(&mut a.profile_name);
        }
        AuthMode::Ntlm(a) => {
            text(&mut a.username);
            text(&mut a.password);
            text(&mut a.domain);
        }
        AuthMode::Wsse(a) => {
            text(&mut a.username);
            text(&mut a.password);
        }
        AuthMode::ApiKey(a) => {
            text(&mut a.key);
            text(&mut a.value);
        }
        AuthMode::OAuth1(a) => {
            for field in [
                &mut a.consumer_key,
                &mut a.consumer_secret,
                &mut a.access_token,
                &mut a.token_secret,
                &mut a.rsa_private_key,
                &mut a.callback_url,
                &mut a.verifier,
                &mut a.realm,
                &mut a.timestamp,
                &mut a.nonce,
            ] {
                text(field);
            }
        }
        AuthMode::OAuth2(c) => {
            for field in [
                &mut c.access_token_url,
                &mut c.authorization_url,
                &mut c.callback_url,
                &mut c.refresh_token_url,
                &mut c.client_id,
                &mut c.client_secret,
                &mut c.username,
                &mut c.password,
                &mut c.scope,
                &mut c.state,
                &mut c.credentials_id,
                &mut c.token_header_prefix,
                &mut c.token_header_name,
                &mut c.token_query_key,
            ] {
                text(field);
            }
            let params = &mut c.additional_params;
            for param in params
                .authorization
                .iter_mut()
                .chain(params.token.iter_mut())
                .chain(params.refresh.iter_mut())
            {
                interpolate_param(param, interp);
            }
        }
    }
}

fn interpolate_param(param: &mut AdditionalParam, interp: &Interpolator) {
    param.name = interp.interpolate(&param.name);
    param.value = interp.interpolate(&param.value);
}

fn interpolate_proxy(config: &mut ProxyConfig, interp: &Interpolator) {
    for field in [
        &mut config.protocol,
        &mut config.hostname,
        &mut config.port,
        &mut config.auth.username,
        &mut config.auth.password,
        &mut config.bypass_proxy,
    ] {
        *field = interp.interpolate(field);
    }
}
