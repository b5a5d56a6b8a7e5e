use ffmpeg_next::{codec::context::Context, frame};

use super::{input::CaptureStream, packet::RawPacket};

/// Decodes the capture stream into raw video frames.
pub struct Decoder {
    inner: ffmpeg_next::decoder::Video,
}

impl Decoder {
    pub fn new(stream: &CaptureStream) -> anyhow::Result<Self> {
        let context = Context::from_parameters(stream.parameters.clone())?;
        let decoder = context.decoder().video()?;

        if decoder.format() == ffmpeg_next::format::Pixel::None
            || decoder.width() == 0
            || decoder.height() == 0
        {
            anyhow::bail!("missing codec parameters");
        }
        Ok(Self { inner: decoder })
    }

    pub fn send_packet(&mut self, packet: &RawPacket) -> anyhow::Result<()> {
        self.inner.send_packet(packet.packet())?;
        Ok(())
    }

    pub fn receive_frame(&mut self) -> anyhow::Result<Option<frame::Video>> {
        let mut frame = frame::Video::empty();
        match self.inner.receive_frame(&mut frame) {
            Ok(()) => Ok(Some(frame)),
            Err(ffmpeg_next::Error::Eof) => Ok(None),
            Err(ffmpeg_next::Error::Other { errno }) if errno == ffmpeg_next::util::error::EAGAIN => {
                Ok(None)
            }
            Err(err) => Err(err.into()),
        }
    }
}
