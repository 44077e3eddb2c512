use bytes::{BufMut, BytesMut};

use crate::codec::{write_frame, DEFAULT_MAX_FRAME_SIZE, MAX_MAX_FRAME_SIZE};
use crate::error::{FrameError, Result};
use crate::types::{Flags, FrameType};

/// Largest flow-control window (2^31 - 1).
pub const MAX_WINDOW_SIZE: u32 = 0x7fff_ffff;

/// Initial window size before any SETTINGS exchange.
pub const DEFAULT_INITIAL_WINDOW_SIZE: u32 = 65_535;

/// Initial HPACK dynamic table size.
pub const DEFAULT_HEADER_TABLE_SIZE: u32 = 4_096;

const SETTING_SIZE: usize = 6;

/// SETTINGS parameter identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SettingId {
    HeaderTableSize,
    EnablePush,
    MaxConcurrentStreams,
    InitialWindowSize,
    MaxFrameSize,
    MaxHeaderListSize,
    Unknown(u16),
}

impl From<u16> for SettingId {
    fn from(value: u16) -> Self {
        match value {
            0x1 => SettingId::HeaderTableSize,
            0x2 => SettingId::EnablePush,
            0x3 => SettingId::MaxConcurrentStreams,
            0x4 => SettingId::InitialWindowSize,
            0x5 => SettingId::MaxFrameSize,
            0x6 => SettingId::MaxHeaderListSize,
            other => SettingId::Unknown(other),
        }
    }
}

impl From<SettingId> for u16 {
    fn from(value: SettingId) -> Self {
        match value {
            SettingId::HeaderTableSize => 0x1,
            SettingId::EnablePush => 0x2,
            SettingId::MaxConcurrentStreams => 0x3,
            SettingId::InitialWindowSize => 0x4,
            SettingId::MaxFrameSize => 0x5,
            SettingId::MaxHeaderListSize => 0x6,
            SettingId::Unknown(other) => other,
        }
    }
}

/// One endpoint's view of the connection settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Settings {
    pub header_table_size: u32,
    pub enable_push: bool,
    /// `None` means no limit was advertised.
    pub max_concurrent_streams: Option<u32>,
    pub initial_window_size: u32,
    pub max_frame_size: u32,
    /// `None` means no limit was advertised.
    pub max_header_list_size: Option<u32>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            header_table_size: DEFAULT_HEADER_TABLE_SIZE,
            enable_push: true,
            max_concurrent_streams: None,
            initial_window_size: DEFAULT_INITIAL_WINDOW_SIZE,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE as u32,
            max_header_list_size: None,
        }
    }
}

impl Settings {
    /// Validate and apply one parameter. Unknown identifiers are ignored.
    pub fn apply(&mut self, id: SettingId, value: u32) -> Result<()> {
        let invalid = || FrameError::InvalidSetting {
            id: id.into(),
            value,
        };
        match id {
            SettingId::HeaderTableSize => self.header_table_size = value,
            SettingId::EnablePush => match value {
                0 => self.enable_push = false,
                1 => self.enable_push = true,
                _ => return Err(invalid()),
            },
            SettingId::MaxConcurrentStreams => self.max_concurrent_streams = Some(value),
            SettingId::InitialWindowSize => {
                if value > MAX_WINDOW_SIZE {
                    return Err(invalid());
                }
                self.initial_window_size = value;
            }
            SettingId::MaxFrameSize => {
                let size = value as usize;
                if !(DEFAULT_MAX_FRAME_SIZE..=MAX_MAX_FRAME_SIZE).contains(&size) {
                    return Err(invalid());
                }
                self.max_frame_size = value;
            }
            SettingId::MaxHeaderListSize => self.max_header_list_size = Some(value),
            SettingId::Unknown(_) => {}
        }
        Ok(())
    }

    /// The parameters that differ from the protocol defaults, in identifier
    /// order. This is what an endpoint needs to advertise.
    pub fn non_default(&self) -> Vec<(SettingId, u32)> {
        let defaults = Settings::default();
        let mut params = Vec::new();
        if self.header_table_size != defaults.header_table_size {
            params.push((SettingId::HeaderTableSize, self.header_table_size));
        }
        if self.enable_push != defaults.enable_push {
            params.push((SettingId::EnablePush, u32::from(self.enable_push)));
        }
        if let Some(max) = self.max_concurrent_streams {
            params.push((SettingId::MaxConcurrentStreams, max));
        }
        if self.initial_window_size != defaults.initial_window_size {
            params.push((SettingId::InitialWindowSize, self.initial_window_size));
        }
        if self.max_frame_size != defaults.max_frame_size {
            params.push((SettingId::MaxFrameSize, self.max_frame_size));
        }
        if let Some(max) = self.max_header_list_size {
            params.push((SettingId::MaxHeaderListSize, max));
        }
        params
    }
}

/// Split a SETTINGS payload into parameters.
///
/// The length must be a multiple of 6. Values are not range checked here; see
/// [`Settings::apply`].
pub fn parse_settings(payload: &[u8]) -> Result<Vec<(SettingId, u32)>> {
    if payload.len() % SETTING_SIZE != 0 {
        return Err(FrameError::InvalidLength {
            frame_type: FrameType::Settings,
            length: payload.len(),
            reason: "must be a multiple of 6",
        });
    }
    Ok(payload
        .chunks_exact(SETTING_SIZE)
        .map(|entry| {
            let id = u16::from_be_bytes([entry[0], entry[1]]);
            let value = u32::from_be_bytes([entry[2], entry[3], entry[4], entry[5]]);
            (SettingId::from(id), value)
        })
        .collect())
}

/// Write a SETTINGS frame carrying `params`.
pub fn write_settings(params: &[(SettingId, u32)], dst: &mut BytesMut) -> Result<()> {
    let mut payload = BytesMut::with_capacity(params.len() * SETTING_SIZE);
    for (id, value) in params {
        payload.put_u16(u16::from(*id));
        payload.put_u32(*value);
    }
    write_frame(
        FrameType::Settings,
        Flags::empty(),
        0,
        &payload,
        DEFAULT_MAX_FRAME_SIZE,
        dst,
    )
}

/// Write an empty SETTINGS frame with the ACK flag.
pub fn write_settings_ack(dst: &mut BytesMut) -> Result<()> {
    write_frame(
        FrameType::Settings,
        Flags::ACK,
        0,
        &[],
        DEFAULT_MAX_FRAME_SIZE,
        dst,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::try_parse_frame;
    use crate::error::FrameError;
    use crate::types::ErrorCode;

    #[test]
    fn write_and_parse_parameters() {
        let mut buf = BytesMut::new();
        let params = [
            (SettingId::MaxConcurrentStreams, 100),
            (SettingId::InitialWindowSize, 1 << 20),
        ];
        write_settings(&params, &mut buf).unwrap();

        let (frame, _) = try_parse_frame(&buf, 16_384).unwrap().unwrap();
        assert_eq!(frame.kind(), FrameType::Settings);
        assert_eq!(frame.payload.len(), 12);
        assert_eq!(parse_settings(frame.payload).unwrap(), params);
    }

    #[test]
    fn length_must_be_multiple_of_six() {
        let err = parse_settings(&[0, 1, 0, 0, 0]).unwrap_err();
        assert_eq!(err.error_code(), ErrorCode::FrameSizeError);
    }

    #[test]
    fn apply_validates_ranges() {
        let mut settings = Settings::default();
        settings.apply(SettingId::EnablePush, 0).unwrap();
        assert!(!settings.enable_push);

        let err = settings.apply(SettingId::EnablePush, 2).unwrap_err();
        assert_eq!(err.error_code(), ErrorCode::ProtocolError);

        let err = settings
            .apply(SettingId::InitialWindowSize, MAX_WINDOW_SIZE + 1)
            .unwrap_err();
        assert_eq!(err.error_code(), ErrorCode::FlowControlError);

        assert!(matches!(
            settings.apply(SettingId::MaxFrameSize, 16_383),
            Err(FrameError::InvalidSetting { id: 5, .. })
        ));
        assert!(settings.apply(SettingId::MaxFrameSize, 16_777_216).is_err());
        settings.apply(SettingId::MaxFrameSize, 32_768).unwrap();
        assert_eq!(settings.max_frame_size, 32_768);

        settings.apply(SettingId::Unknown(0xff), 12).unwrap();
    }

    #[test]
    fn non_default_lists_only_changes() {
        assert!(Settings::default().non_default().is_empty());

        let settings = Settings {
            max_concurrent_streams: Some(100),
            initial_window_size: 96 * 1024,
            ..Settings::default()
        };
        assert_eq!(
            settings.non_default(),
            vec![
                (SettingId::MaxConcurrentStreams, 100),
                (SettingId::InitialWindowSize, 96 * 1024)
            ]
        );
    }

    #[test]
    fn ack_is_empty() {
        let mut buf = BytesMut::new();
        write_settings_ack(&mut buf).unwrap();
        assert_eq!(&buf[..], &[0, 0, 0, 0x4, 0x1, 0, 0, 0, 0]);
    }
}
