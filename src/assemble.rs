//! Shapes raw authenticator output into WebAuthn response records: the
//! client-data JSON fed to the device (hashed) and returned to the caller,
//! and the CBOR attestation object.

use std::collections::BTreeMap;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use serde::Serialize;
use serde_bytes::ByteBuf;
use serde_cbor::Value;
use sha2::{Digest, Sha256};

use crate::error::Error;
use crate::ops::webauthn::{
    CoseAlgorithmIdentifier, CredentialAssertionResponse, CredentialCreationResponse,
};
use crate::transport::device::{Assertion, Attestation, AttestationFormat};

pub(crate) const CEREMONY_CREATE: &str = "webauthn.create";
pub(crate) const CEREMONY_GET: &str = "webauthn.get";

#[derive(Debug, Serialize)]
struct CollectedClientData<'a> {
    #[serde(rename = "type")]
    ceremony: &'a str,
    challenge: String,
    origin: &'a str,
}

pub(crate) fn client_data_json(
    ceremony: &str,
    challenge: &[u8],
    origin: &str,
) -> Result<Vec<u8>, Error> {
    let client_data = CollectedClientData {
        ceremony,
        challenge: URL_SAFE_NO_PAD.encode(challenge),
        origin,
    };
    serde_json::to_vec(&client_data).map_err(|err| Error::Internal(err.to_string()))
}

pub(crate) fn sha256(data: &[u8]) -> Vec<u8> {
    Sha256::digest(data).to_vec()
}

/// Devices hand back authenticator data as a CBOR byte string; responses
/// carry the raw bytes.
fn decode_auth_data(cbor: &[u8]) -> Result<Vec<u8>, Error> {
    let raw: ByteBuf = serde_cbor::from_slice(cbor)
        .map_err(|err| Error::Internal(format!("authenticator data: {}", err)))?;
    Ok(raw.into_vec())
}

#[derive(Serialize)]
struct AttestationObject<'a> {
    #[serde(rename = "fmt")]
    format: &'a str,
    #[serde(rename = "attStmt")]
    statement: Value,
    #[serde(rename = "authData")]
    auth_data: ByteBuf,
}

fn attestation_statement(attestation: &Attestation) -> Value {
    let mut statement: BTreeMap<Value, Value> = BTreeMap::new();
    match attestation.format {
        AttestationFormat::Packed => {
            statement.insert(
                Value::Text("alg".to_owned()),
                Value::Integer(CoseAlgorithmIdentifier::Es256 as i128),
            );
            statement.insert(
                Value::Text("sig".to_owned()),
                Value::Bytes(attestation.signature.clone()),
            );
            statement.insert(
                Value::Text("x5c".to_owned()),
                Value::Array(vec![Value::Bytes(attestation.certificate.clone())]),
            );
        }
        AttestationFormat::FidoU2f => {
            statement.insert(
                Value::Text("sig".to_owned()),
                Value::Bytes(attestation.signature.clone()),
            );
            statement.insert(
                Value::Text("x5c".to_owned()),
                Value::Array(vec![Value::Bytes(attestation.certificate.clone())]),
            );
        }
        AttestationFormat::None => {}
    }
    Value::Map(statement)
}

pub(crate) fn creation_response(
    client_data_json: Vec<u8>,
    attestation: Attestation,
) -> Result<CredentialCreationResponse, Error> {
    let auth_data = decode_auth_data(&attestation.auth_data_cbor)?;
    let object = AttestationObject {
        format: attestation.format.as_str(),
        statement: attestation_statement(&attestation),
        auth_data: ByteBuf::from(auth_data),
    };
    let attestation_object =
        serde_cbor::to_vec(&object).map_err(|err| Error::Internal(err.to_string()))?;
    Ok(CredentialCreationResponse {
        raw_id: attestation.credential_id,
        attestation_object,
        client_data_json,
    })
}

pub(crate) fn assertion_response(
    client_data_json: Vec<u8>,
    assertion: &Assertion,
    app_id: bool,
) -> Result<CredentialAssertionResponse, Error> {
    Ok(CredentialAssertionResponse {
        raw_id: assertion.credential_id.clone(),
        authenticator_data: decode_auth_data(&assertion.auth_data_cbor)?,
        signature: assertion.signature.clone(),
        user_handle: assertion.user.id.clone(),
        client_data_json,
        app_id,
    })
}
