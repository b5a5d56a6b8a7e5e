use ffmpeg_next::{
    format::Pixel,
    frame,
    software::scaling::{Context, Flags},
};

/// Converts frames to the encoder's size and pixel format. The scaling
/// context is rebuilt whenever the source geometry changes.
pub struct Scaler {
    context: Option<(Context, (Pixel, u32, u32))>,
    format: Pixel,
    width: u32,
    height: u32,
}

impl Scaler {
    pub fn new(format: Pixel, width: u32, height: u32) -> Self {
        Self {
            context: None,
            format,
            width,
            height,
        }
    }

    pub fn run(&mut self, src: &frame::Video) -> anyhow::Result<frame::Video> {
        let source = (src.format(), src.width(), src.height());
        if self.context.as_ref().is_none_or(|(_, s)| *s != source) {
            let context = Context::get(
                source.0,
                source.1,
                source.2,
                self.format,
                self.width,
                self.height,
                Flags::BILINEAR,
            )?;
            self.context = Some((context, source));
        }

        let mut dst = frame::Video::empty();
        if let Some((context, _)) = self.context.as_mut() {
            context.run(src, &mut dst)?;
        }
        Ok(dst)
    }
}

unsafe impl Send for Scaler {}
