//! The query wire protocol.
//!
//! The first byte of every frame selects the body encoding: `0xAB` for
//! JSON, `0xBA` for binary. Requests carry a client version string, a
//! command string, and the command body; responses mirror that framing
//! with the server version. Responses are written in the encoding the
//! request arrived in. The JSON and binary encodings are peers over the
//! same message types.

use serde::{Deserialize, Serialize};

use relwatch_core::blacklist::{Blacklist, MatchKind};
use relwatch_core::coordinate::Coordinate;
use relwatch_core::version::Version;
use relwatch_util::errors::RelwatchError;

use crate::codec::{Decoder, Encoder};
use crate::records::{self, CURRENT_SCHEMA};

/// Frame tag for JSON bodies.
pub const PROTOCOL_JSON: u8 = 0xAB;
/// Frame tag for binary bodies.
pub const PROTOCOL_BINARY: u8 = 0xBA;

/// The protocol version this server speaks.
pub const SERVER_VERSION: &str = "2.0";
/// The one command currently defined.
pub const COMMAND_QUERY: &str = "query";

/// Body encoding of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Json,
    Binary,
}

impl Encoding {
    fn tag(self) -> u8 {
        match self {
            Self::Json => PROTOCOL_JSON,
            Self::Binary => PROTOCOL_BINARY,
        }
    }
}

/// Whether an update is available for a queried artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateAvailable {
    Yes,
    No,
    Maybe,
    NotFound,
}

impl UpdateAvailable {
    fn to_u8(self) -> u8 {
        match self {
            Self::Yes => 0,
            Self::No => 1,
            Self::Maybe => 2,
            Self::NotFound => 3,
        }
    }

    fn from_u8(value: u8, offset: usize) -> Result<Self, RelwatchError> {
        match value {
            0 => Ok(Self::Yes),
            1 => Ok(Self::No),
            2 => Ok(Self::Maybe),
            3 => Ok(Self::NotFound),
            other => Err(RelwatchError::decode(
                format!("invalid update-available tag {other}"),
                offset,
            )),
        }
    }
}

/// Body of the `query` command.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryRequest {
    pub artifacts: Vec<Coordinate>,
    #[serde(default)]
    pub blacklist: Option<Blacklist>,
}

/// Per-artifact answer to a query.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactResponse {
    pub artifact: Coordinate,
    #[serde(default)]
    pub current_version: Option<Version>,
    #[serde(default)]
    pub latest_version: Option<Version>,
    pub update_available: UpdateAvailable,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResponse {
    pub artifacts: Vec<ArtifactResponse>,
}

/// A framed client request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Request {
    pub client_version: String,
    pub command: String,
    pub body: QueryRequest,
}

impl Request {
    pub fn query(client_version: impl Into<String>, body: QueryRequest) -> Self {
        Self {
            client_version: client_version.into(),
            command: COMMAND_QUERY.to_string(),
            body,
        }
    }
}

/// A framed server response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    pub server_version: String,
    pub command: String,
    pub body: QueryResponse,
}

impl Response {
    pub fn query(body: QueryResponse) -> Self {
        Self {
            server_version: SERVER_VERSION.to_string(),
            command: COMMAND_QUERY.to_string(),
            body,
        }
    }
}

pub fn encode_request(request: &Request, encoding: Encoding) -> Result<Vec<u8>, RelwatchError> {
    let mut out = vec![encoding.tag()];
    match encoding {
        Encoding::Json => out.extend_from_slice(&to_json(request)?),
        Encoding::Binary => {
            let mut enc = Encoder::new();
            enc.put_string(Some(&request.client_version));
            enc.put_string(Some(&request.command));
            encode_query_request(&mut enc, &request.body);
            out.extend_from_slice(enc.bytes());
        }
    }
    Ok(out)
}

pub fn decode_request(bytes: &[u8]) -> Result<(Request, Encoding), RelwatchError> {
    let (tag, body) = split_frame(bytes)?;
    match tag {
        PROTOCOL_JSON => {
            let request: Request = from_json(body)?;
            check_command(&request.command)?;
            Ok((request, Encoding::Json))
        }
        PROTOCOL_BINARY => {
            let mut dec = Decoder::new(body);
            let client_version = dec.get_required_string("client version")?;
            let command = dec.get_required_string("command")?;
            check_command(&command)?;
            let body = decode_query_request(&mut dec)?;
            Ok((
                Request {
                    client_version,
                    command,
                    body,
                },
                Encoding::Binary,
            ))
        }
        other => Err(RelwatchError::decode(
            format!("unknown protocol tag 0x{other:02x}"),
            0,
        )),
    }
}

pub fn encode_response(response: &Response, encoding: Encoding) -> Result<Vec<u8>, RelwatchError> {
    let mut out = vec![encoding.tag()];
    match encoding {
        Encoding::Json => out.extend_from_slice(&to_json(response)?),
        Encoding::Binary => {
            let mut enc = Encoder::new();
            enc.put_string(Some(&response.server_version));
            enc.put_string(Some(&response.command));
            encode_query_response(&mut enc, &response.body);
            out.extend_from_slice(enc.bytes());
        }
    }
    Ok(out)
}

pub fn decode_response(bytes: &[u8]) -> Result<(Response, Encoding), RelwatchError> {
    let (tag, body) = split_frame(bytes)?;
    match tag {
        PROTOCOL_JSON => Ok((from_json(body)?, Encoding::Json)),
        PROTOCOL_BINARY => {
            let mut dec = Decoder::new(body);
            let server_version = dec.get_required_string("server version")?;
            let command = dec.get_required_string("command")?;
            check_command(&command)?;
            let body = decode_query_response(&mut dec)?;
            Ok((
                Response {
                    server_version,
                    command,
                    body,
                },
                Encoding::Binary,
            ))
        }
        other => Err(RelwatchError::decode(
            format!("unknown protocol tag 0x{other:02x}"),
            0,
        )),
    }
}

fn split_frame(bytes: &[u8]) -> Result<(u8, &[u8]), RelwatchError> {
    match bytes.split_first() {
        Some((tag, rest)) => Ok((*tag, rest)),
        None => Err(RelwatchError::decode("empty frame", 0)),
    }
}

fn check_command(command: &str) -> Result<(), RelwatchError> {
    if command == COMMAND_QUERY {
        Ok(())
    } else {
        Err(RelwatchError::decode(
            format!("unknown command {command:?}"),
            0,
        ))
    }
}

fn to_json<T: Serialize>(value: &T) -> Result<Vec<u8>, RelwatchError> {
    serde_json::to_vec(value).map_err(|e| RelwatchError::Generic {
        message: format!("failed to serialize wire message: {e}"),
    })
}

fn from_json<T: for<'de> Deserialize<'de>>(bytes: &[u8]) -> Result<T, RelwatchError> {
    serde_json::from_slice(bytes)
        .map_err(|e| RelwatchError::decode(format!("invalid JSON body: {e}"), 1))
}

fn encode_query_request(enc: &mut Encoder, body: &QueryRequest) {
    enc.put_i32(body.artifacts.len() as i32);
    for coord in &body.artifacts {
        records::encode_coordinate(enc, coord);
    }
    match &body.blacklist {
        None => enc.put_bool(false),
        Some(blacklist) => {
            enc.put_bool(true);
            encode_blacklist(enc, blacklist);
        }
    }
}

fn decode_query_request(dec: &mut Decoder<'_>) -> Result<QueryRequest, RelwatchError> {
    let count = get_count(dec, "artifact count")?;
    let mut artifacts = Vec::with_capacity(count.min(1024));
    for _ in 0..count {
        artifacts.push(records::decode_coordinate(dec)?);
    }
    let blacklist = if dec.get_bool()? {
        Some(decode_blacklist(dec)?)
    } else {
        None
    };
    Ok(QueryRequest {
        artifacts,
        blacklist,
    })
}

fn encode_query_response(enc: &mut Encoder, body: &QueryResponse) {
    enc.put_i32(body.artifacts.len() as i32);
    for artifact in &body.artifacts {
        records::encode_coordinate(enc, &artifact.artifact);
        encode_optional_version(enc, artifact.current_version.as_ref());
        encode_optional_version(enc, artifact.latest_version.as_ref());
        enc.put_u8(artifact.update_available.to_u8());
    }
}

fn decode_query_response(dec: &mut Decoder<'_>) -> Result<QueryResponse, RelwatchError> {
    let count = get_count(dec, "artifact count")?;
    let mut artifacts = Vec::with_capacity(count.min(1024));
    for _ in 0..count {
        let artifact = records::decode_coordinate(dec)?;
        let current_version = decode_optional_version(dec)?;
        let latest_version = decode_optional_version(dec)?;
        let offset = dec.offset();
        let update_available = UpdateAvailable::from_u8(dec.get_u8()?, offset)?;
        artifacts.push(ArtifactResponse {
            artifact,
            current_version,
            latest_version,
            update_available,
        });
    }
    Ok(QueryResponse { artifacts })
}

fn encode_optional_version(enc: &mut Encoder, version: Option<&Version>) {
    match version {
        None => enc.put_bool(false),
        Some(v) => {
            enc.put_bool(true);
            records::encode_version(enc, v, CURRENT_SCHEMA);
        }
    }
}

fn decode_optional_version(dec: &mut Decoder<'_>) -> Result<Option<Version>, RelwatchError> {
    if dec.get_bool()? {
        Ok(Some(records::decode_version(dec, CURRENT_SCHEMA)?))
    } else {
        Ok(None)
    }
}

fn encode_blacklist(enc: &mut Encoder, blacklist: &Blacklist) {
    let global = blacklist.global_matchers();
    enc.put_i32(global.len() as i32);
    for matcher in global {
        encode_matcher(enc, matcher.kind(), matcher.pattern());
    }

    let groups: Vec<_> = blacklist.group_entries().collect();
    enc.put_i32(groups.len() as i32);
    for (group, matchers) in groups {
        enc.put_string(Some(group));
        enc.put_i32(matchers.len() as i32);
        for matcher in matchers {
            encode_matcher(enc, matcher.kind(), matcher.pattern());
        }
    }

    let artifacts: Vec<_> = blacklist.artifact_entries().collect();
    enc.put_i32(artifacts.len() as i32);
    for (group, artifact, matchers) in artifacts {
        enc.put_string(Some(group));
        enc.put_string(Some(artifact));
        enc.put_i32(matchers.len() as i32);
        for matcher in matchers {
            encode_matcher(enc, matcher.kind(), matcher.pattern());
        }
    }
}

fn decode_blacklist(dec: &mut Decoder<'_>) -> Result<Blacklist, RelwatchError> {
    let mut blacklist = Blacklist::new();

    let global = get_count(dec, "global matcher count")?;
    for _ in 0..global {
        let (kind, pattern) = decode_matcher(dec)?;
        blacklist.add_ignored_version(pattern, kind)?;
    }

    let groups = get_count(dec, "group entry count")?;
    for _ in 0..groups {
        let group = dec.get_required_string("group id")?;
        let matchers = get_count(dec, "group matcher count")?;
        for _ in 0..matchers {
            let (kind, pattern) = decode_matcher(dec)?;
            blacklist.add_ignored_group_version(&group, pattern, kind)?;
        }
    }

    let artifacts = get_count(dec, "artifact entry count")?;
    for _ in 0..artifacts {
        let group = dec.get_required_string("group id")?;
        let artifact = dec.get_required_string("artifact id")?;
        let matchers = get_count(dec, "artifact matcher count")?;
        for _ in 0..matchers {
            let (kind, pattern) = decode_matcher(dec)?;
            blacklist.add_ignored_artifact_version(&group, &artifact, pattern, kind)?;
        }
    }

    Ok(blacklist)
}

fn encode_matcher(enc: &mut Encoder, kind: MatchKind, pattern: &str) {
    enc.put_u8(match kind {
        MatchKind::Exact => 0,
        MatchKind::Regex => 1,
    });
    enc.put_string(Some(pattern));
}

fn decode_matcher(dec: &mut Decoder<'_>) -> Result<(MatchKind, String), RelwatchError> {
    let offset = dec.offset();
    let kind = match dec.get_u8()? {
        0 => MatchKind::Exact,
        1 => MatchKind::Regex,
        other => {
            return Err(RelwatchError::decode(
                format!("invalid matcher kind {other}"),
                offset,
            ))
        }
    };
    let pattern = dec.get_required_string("matcher pattern")?;
    Ok((kind, pattern))
}

fn get_count(dec: &mut Decoder<'_>, what: &str) -> Result<usize, RelwatchError> {
    let offset = dec.offset();
    let count = dec.get_i32()?;
    if count < 0 {
        return Err(RelwatchError::decode(
            format!("negative {what}: {count}"),
            offset,
        ));
    }
    Ok(count as usize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn sample_request() -> Request {
        let mut blacklist = Blacklist::new();
        blacklist
            .add_ignored_version("2\\..*", MatchKind::Regex)
            .unwrap();
        blacklist
            .add_ignored_artifact_version("com.example", "lib", "1.0", MatchKind::Exact)
            .unwrap();
        Request::query(
            "1.0",
            QueryRequest {
                artifacts: vec![
                    Coordinate::with_version("org.apache.commons", "commons-lang3", "3.11"),
                    Coordinate::new("com.example", "lib"),
                ],
                blacklist: Some(blacklist),
            },
        )
    }

    fn sample_response() -> Response {
        let released = Utc.with_ymd_and_hms(2021, 7, 12, 12, 13, 0).unwrap();
        Response::query(QueryResponse {
            artifacts: vec![ArtifactResponse {
                artifact: Coordinate::with_version("org.apache.commons", "commons-lang3", "3.11"),
                current_version: Some(Version::new("3.11")),
                latest_version: Some(Version::with_release_date("3.12.0", released)),
                update_available: UpdateAvailable::Yes,
            }],
        })
    }

    #[test]
    fn binary_request_roundtrip() {
        let request = sample_request();
        let bytes = encode_request(&request, Encoding::Binary).unwrap();
        assert_eq!(bytes[0], PROTOCOL_BINARY);

        let (back, encoding) = decode_request(&bytes).unwrap();
        assert_eq!(encoding, Encoding::Binary);
        assert_eq!(back.client_version, "1.0");
        assert_eq!(back.command, COMMAND_QUERY);
        assert_eq!(back.body.artifacts, request.body.artifacts);
        let blacklist = back.body.blacklist.unwrap();
        assert!(blacklist.is_version_blacklisted("org.any", "thing", "2.7"));
        assert!(blacklist.is_version_blacklisted("com.example", "lib", "1.0"));
    }

    #[test]
    fn json_request_roundtrip() {
        let request = sample_request();
        let bytes = encode_request(&request, Encoding::Json).unwrap();
        assert_eq!(bytes[0], PROTOCOL_JSON);

        let (back, encoding) = decode_request(&bytes).unwrap();
        assert_eq!(encoding, Encoding::Json);
        assert_eq!(back.body.artifacts, request.body.artifacts);
        assert!(back
            .body
            .blacklist
            .unwrap()
            .is_version_blacklisted("org.any", "thing", "2.7"));
    }

    #[test]
    fn binary_response_roundtrip() {
        let response = sample_response();
        let bytes = encode_response(&response, Encoding::Binary).unwrap();

        let (back, _) = decode_response(&bytes).unwrap();
        assert_eq!(back.server_version, SERVER_VERSION);
        let artifact = &back.body.artifacts[0];
        assert_eq!(artifact.update_available, UpdateAvailable::Yes);
        assert_eq!(
            artifact.latest_version.as_ref().unwrap().version_string,
            "3.12.0"
        );
        assert_eq!(
            artifact.latest_version.as_ref().unwrap().release_date,
            response.body.artifacts[0]
                .latest_version
                .as_ref()
                .unwrap()
                .release_date
        );
    }

    #[test]
    fn json_response_uses_snake_case_update_values() {
        let mut response = sample_response();
        response.body.artifacts[0].update_available = UpdateAvailable::NotFound;
        let bytes = encode_response(&response, Encoding::Json).unwrap();
        let json = std::str::from_utf8(&bytes[1..]).unwrap();
        assert!(json.contains("\"not_found\""));
        assert!(json.contains("\"serverVersion\":\"2.0\""));
    }

    #[test]
    fn unknown_protocol_tag_is_rejected() {
        let err = decode_request(&[0x77, 1, 2, 3]).unwrap_err();
        assert!(err.to_string().contains("unknown protocol tag"));
    }

    #[test]
    fn unknown_command_is_rejected() {
        let mut request = sample_request();
        request.command = "explode".to_string();
        let bytes = encode_request(&request, Encoding::Binary).unwrap();
        assert!(decode_request(&bytes).is_err());
    }

    #[test]
    fn empty_frame_is_rejected() {
        assert!(decode_request(&[]).is_err());
    }

    #[test]
    fn binary_encoding_is_deterministic() {
        let request = sample_request();
        let a = encode_request(&request, Encoding::Binary).unwrap();
        let b = encode_request(&request, Encoding::Binary).unwrap();
        assert_eq!(a, b);
    }
}
