use ffmpeg_next::{
    Dictionary, Rational,
    codec::{self, Parameters, packet::Packet},
    format::Pixel,
    frame,
};

use super::{Canvas, hw::pixel_format_for, packet::RawPacket};
use crate::engine::EncoderSettings;

/// AVOption pairs derived from backend settings.
pub fn options_from_settings(settings: &EncoderSettings) -> Vec<(String, String)> {
    settings
        .iter()
        .filter_map(|(key, value)| {
            let value = match value {
                serde_json::Value::String(s) => s.clone(),
                serde_json::Value::Number(n) => n.to_string(),
                serde_json::Value::Bool(b) => (if *b { "1" } else { "0" }).to_string(),
                _ => return None,
            };
            Some((key.clone(), value))
        })
        .collect()
}

fn dictionary(options: &[(String, String)]) -> Dictionary<'static> {
    let mut dict = Dictionary::new();
    for (key, value) in options {
        dict.set(key, value);
    }
    dict
}

/// An opened H.264 video encoder producing packets in `1/fps` time base.
pub struct VideoEncoder {
    inner: ffmpeg_next::encoder::Video,
    codec: String,
    time_base: Rational,
}

impl VideoEncoder {
    pub fn open(codec: &str, options: &[(String, String)], canvas: Canvas) -> anyhow::Result<Self> {
        let found = ffmpeg_next::encoder::find_by_name(codec)
            .ok_or_else(|| anyhow::anyhow!("codec not found: {}", codec))?;
        let time_base = Rational(1, canvas.fps as i32);

        let mut encoder = codec::Context::new_with_codec(found).encoder().video()?;
        encoder.set_width(canvas.width);
        encoder.set_height(canvas.height);
        encoder.set_format(pixel_format_for(codec));
        encoder.set_time_base(time_base);
        encoder.set_frame_rate(Some(Rational(canvas.fps as i32, 1)));
        encoder.set_gop(canvas.fps * 2);
        encoder.set_flags(codec::Flags::GLOBAL_HEADER);

        let inner = encoder.open_with(dictionary(options))?;
        Ok(Self {
            inner,
            codec: codec.to_string(),
            time_base,
        })
    }

    pub fn codec(&self) -> &str {
        &self.codec
    }

    pub fn format(&self) -> Pixel {
        self.inner.format()
    }

    pub fn time_base(&self) -> Rational {
        self.time_base
    }

    /// Stream parameters for muxing, including the global header.
    pub fn parameters(&self) -> Parameters {
        Parameters::from(&self.inner)
    }

    pub fn encode(&mut self, frame: &frame::Video) -> anyhow::Result<Vec<RawPacket>> {
        self.inner.send_frame(frame)?;
        self.drain()
    }

    fn drain(&mut self) -> anyhow::Result<Vec<RawPacket>> {
        let mut packets = Vec::new();
        loop {
            let mut packet = Packet::empty();
            match self.inner.receive_packet(&mut packet) {
                Ok(()) => {
                    packet.set_duration(1);
                    packets.push((packet, self.time_base).into());
                }
                Err(ffmpeg_next::Error::Other { errno })
                    if errno == ffmpeg_next::util::error::EAGAIN =>
                {
                    break;
                }
                Err(ffmpeg_next::Error::Eof) => break,
                Err(err) => return Err(err.into()),
            }
        }
        Ok(packets)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_options_from_settings() {
        let settings = match json!({
            "rc": "constqp",
            "qp": 20,
            "look_ahead": false,
            "ignored": [1, 2],
        }) {
            serde_json::Value::Object(map) => map,
            _ => unreachable!(),
        };
        let mut options = options_from_settings(&settings);
        options.sort();
        assert_eq!(
            options,
            vec![
                ("look_ahead".to_string(), "0".to_string()),
                ("qp".to_string(), "20".to_string()),
                ("rc".to_string(), "constqp".to_string()),
            ]
        );
    }
}
