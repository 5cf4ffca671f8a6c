//! Binary schemas for coordinates, versions, and version records.
//!
//! Schema 3 added `first_seen_by_server` to each version entry; schema 2
//! files are still decodable and are migrated by the store on load.

use relwatch_core::coordinate::Coordinate;
use relwatch_core::version::{Version, VersionInfo};
use relwatch_util::errors::RelwatchError;

use crate::codec::{Decoder, Encoder};

/// Schema predating `first_seen_by_server`.
pub const SCHEMA_V2: u16 = 2;
/// Schema carrying `first_seen_by_server` per version.
pub const SCHEMA_V3: u16 = 3;
/// The schema written by current code.
pub const CURRENT_SCHEMA: u16 = SCHEMA_V3;

pub fn encode_coordinate(enc: &mut Encoder, coord: &Coordinate) {
    enc.put_string(Some(&coord.group_id));
    enc.put_string(Some(&coord.artifact_id));
    enc.put_string(coord.version.as_deref());
    enc.put_string(coord.classifier.as_deref());
    enc.put_string(Some(&coord.kind));
}

pub fn decode_coordinate(dec: &mut Decoder<'_>) -> Result<Coordinate, RelwatchError> {
    Ok(Coordinate {
        group_id: dec.get_required_string("group id")?,
        artifact_id: dec.get_required_string("artifact id")?,
        version: dec.get_string()?,
        classifier: dec.get_string()?,
        kind: dec.get_required_string("artifact type")?,
    })
}

pub fn encode_version(enc: &mut Encoder, version: &Version, schema: u16) {
    enc.put_string(Some(&version.version_string));
    enc.put_date(version.release_date);
    if schema >= SCHEMA_V3 {
        enc.put_date(version.first_seen_by_server);
    }
}

pub fn decode_version(dec: &mut Decoder<'_>, schema: u16) -> Result<Version, RelwatchError> {
    let version_string = dec.get_required_string("version string")?;
    let release_date = dec.get_date()?;
    let first_seen_by_server = if schema >= SCHEMA_V3 {
        dec.get_date()?
    } else {
        None
    };
    Ok(Version {
        version_string,
        release_date,
        first_seen_by_server,
    })
}

pub fn encode_version_info(enc: &mut Encoder, info: &VersionInfo, schema: u16) {
    encode_coordinate(enc, &info.artifact);
    enc.put_timestamp(Some(info.creation_date));
    enc.put_timestamp(Some(info.last_request_date));
    enc.put_timestamp(info.last_success_date);
    enc.put_timestamp(info.last_failure_date);
    enc.put_timestamp(info.last_repository_update);
    enc.put_string(info.latest_release_version.as_deref());
    enc.put_string(info.latest_snapshot_version.as_deref());
    enc.put_i32(info.versions.len() as i32);
    for version in &info.versions {
        encode_version(enc, version, schema);
    }
}

pub fn decode_version_info(
    dec: &mut Decoder<'_>,
    schema: u16,
) -> Result<VersionInfo, RelwatchError> {
    let artifact = decode_coordinate(dec)?;
    let creation_offset = dec.offset();
    let creation_date = dec
        .get_timestamp()?
        .ok_or_else(|| RelwatchError::decode("missing creation date", creation_offset))?;
    let request_offset = dec.offset();
    let last_request_date = dec
        .get_timestamp()?
        .ok_or_else(|| RelwatchError::decode("missing last request date", request_offset))?;
    let last_success_date = dec.get_timestamp()?;
    let last_failure_date = dec.get_timestamp()?;
    let last_repository_update = dec.get_timestamp()?;
    let latest_release_version = dec.get_string()?;
    let latest_snapshot_version = dec.get_string()?;

    let count_offset = dec.offset();
    let count = dec.get_i32()?;
    if count < 0 {
        return Err(RelwatchError::decode(
            format!("negative version count {count}"),
            count_offset,
        ));
    }
    let mut versions = Vec::with_capacity(count.min(1024) as usize);
    for _ in 0..count {
        versions.push(decode_version(dec, schema)?);
    }

    Ok(VersionInfo {
        artifact,
        creation_date,
        last_request_date,
        last_success_date,
        last_failure_date,
        last_repository_update,
        latest_release_version,
        latest_snapshot_version,
        versions,
    })
}
