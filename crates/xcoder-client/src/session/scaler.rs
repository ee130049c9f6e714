//! Scaler session (§4.5.3): `Opened → Configured → Streaming → Closed`
//! (scaler sessions collapse `Draining` directly into `Closed`, unlike the
//! decoder). One or more input surfaces are described alongside a single
//! output surface; completion yields a [`HwFrame`] descriptor.

use xcoder_core::{AlignedBuffer, BlockDevice, Context, StatusOracle, XcoderError};
use xcoder_proto::{encode, CropRect, Operation};

use super::state::{InvalidStateError, SessionState};
use crate::hwframe::{HwFrame, SubDescriptor};

/// Which blit pipeline a scaler session was opened with (§4.5.3: "an
/// opcode that selects a blit mode").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlitMode {
    /// One input surface scaled/cropped onto one output.
    Simple,
    /// Multiple input surfaces composited (stacked) onto one output.
    Stack,
}

/// Bit set on a [`FrameDescriptor`] that marks it the output of a
/// multi-config request, distinguishing it from the input descriptors
/// (§4.5.3: "one 'IO' flag must be set on the output descriptor").
pub const OPTION_IS_OUTPUT: u8 = 0x01;

const DESCRIPTOR_LEN: usize = 24;

/// One input or output surface descriptor for a scaler request
/// (§4.5.3: `(W, H, format, options, crop_rect, rgba_color, frame_index,
/// session_id, output_index)`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameDescriptor {
    /// Surface width in pixels.
    pub width: u32,
    /// Surface height in pixels.
    pub height: u32,
    /// Pixel format (codec-specific encoding).
    pub format: u8,
    /// Option bits; see [`OPTION_IS_OUTPUT`].
    pub options: u8,
    /// Crop window applied to this surface.
    pub crop: CropRect,
    /// Solid fill colour used for letterbox/pillarbox padding.
    pub rgba_color: u32,
    /// Accelerator-assigned buffer index (ignored on an input descriptor
    /// supplied by the caller; populated by the accelerator for the
    /// output descriptor on completion).
    pub frame_index: u32,
    /// Session that owns the surface.
    pub session_id: u8,
    /// Output slot this descriptor fills.
    pub output_index: u8,
}

impl FrameDescriptor {
    fn encode_into(self, out: &mut [u8]) {
        out[0..4].copy_from_slice(&self.width.to_le_bytes());
        out[4..8].copy_from_slice(&self.height.to_le_bytes());
        out[8] = self.format;
        out[9] = self.options;
        out[10..12].copy_from_slice(&self.crop.left.to_le_bytes());
        out[12..14].copy_from_slice(&self.crop.top.to_le_bytes());
        out[14..16].copy_from_slice(&self.crop.right.to_le_bytes());
        out[16..18].copy_from_slice(&self.crop.bottom.to_le_bytes());
        out[18] = self.session_id;
        out[19] = self.output_index;
        out[20..24].copy_from_slice(&self.rgba_color.to_le_bytes());
    }
}

/// The scaler session state machine (§4.5.3).
pub struct ScalerSession {
    context: Context,
    state: SessionState,
    blit_mode: BlitMode,
    num_inputs: u8,
}

impl ScalerSession {
    /// Wrap a freshly opened context as a scaler session.
    #[must_use]
    pub fn new(context: Context, blit_mode: BlitMode) -> Self {
        Self { context, state: SessionState::Opened, blit_mode, num_inputs: 1 }
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Which blit pipeline this session was opened with.
    #[must_use]
    pub fn blit_mode(&self) -> BlitMode {
        self.blit_mode
    }

    /// Push `set-scaler-params(filterblit, num_inputs)`, transitioning
    /// `Opened → Configured`.
    pub async fn configure<D: BlockDevice>(&mut self, device: &D, filterblit: bool, num_inputs: u8) -> Result<(), XcoderError> {
        self.state.expect(&[SessionState::Opened])?;
        let mut buf = AlignedBuffer::zeroed(1);
        buf.as_mut_slice()[0] = u8::from(filterblit);
        buf.as_mut_slice()[1] = num_inputs;
        let lba = encode(Operation::SetScalerParams, self.context.wire_session_id(), self.context.instance_type(), self.context.hw_channel());
        device.write_pages(lba, &buf).await.map_err(XcoderError::from)?;
        self.pair_with_status(device).await?;
        self.num_inputs = num_inputs;
        self.state = SessionState::Configured;
        Ok(())
    }

    /// Begin streaming, transitioning `Configured → Streaming`.
    pub fn start_streaming(&mut self) -> Result<(), InvalidStateError> {
        self.state.expect(&[SessionState::Configured])?;
        self.state = SessionState::Streaming;
        Ok(())
    }

    /// Describe one or more input surfaces plus a single output surface,
    /// and wait for the completed surface (§4.5.3).
    ///
    /// # Errors
    ///
    /// Returns [`XcoderError::InvalidParam`] if `output` does not carry
    /// [`OPTION_IS_OUTPUT`], or if `inputs.len()` does not match the
    /// session's configured `num_inputs`.
    pub async fn config_frame<D: BlockDevice>(&mut self, device: &D, inputs: &[FrameDescriptor], output: FrameDescriptor) -> Result<HwFrame, XcoderError> {
        self.state.expect(&[SessionState::Streaming])?;
        if self.context.is_invalid() {
            return Err(XcoderError::InvalidSession);
        }
        if output.options & OPTION_IS_OUTPUT == 0 {
            return Err(XcoderError::InvalidParam("output descriptor missing OPTION_IS_OUTPUT".to_string()));
        }
        if inputs.len() != self.num_inputs as usize {
            return Err(XcoderError::InvalidParam(format!(
                "expected {} input descriptor(s), got {}",
                self.num_inputs,
                inputs.len()
            )));
        }

        let total = DESCRIPTOR_LEN * (inputs.len() + 1);
        let mut buf = AlignedBuffer::zeroed(total);
        {
            let bytes = buf.as_mut_slice();
            for (i, descriptor) in inputs.iter().enumerate() {
                descriptor.encode_into(&mut bytes[i * DESCRIPTOR_LEN..(i + 1) * DESCRIPTOR_LEN]);
            }
            let out_off = inputs.len() * DESCRIPTOR_LEN;
            output.encode_into(&mut bytes[out_off..out_off + DESCRIPTOR_LEN]);
        }

        let lba = encode(Operation::ScalerAllocFrame, self.context.wire_session_id(), self.context.instance_type(), self.context.hw_channel());
        device.write_pages(lba, &buf).await.map_err(XcoderError::from)?;
        self.pair_with_status(device).await?;

        let mut result = AlignedBuffer::zeroed(1);
        let read_lba = encode(Operation::ReadInstance, self.context.wire_session_id(), self.context.instance_type(), self.context.hw_channel());
        device.read_pages(read_lba, &mut result).await.map_err(XcoderError::from)?;
        let bytes: &[u8] = &result;
        let frame_index = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);

        Ok(HwFrame::new(
            self.context.wire_session_id(),
            self.context.hw_channel(),
            vec![SubDescriptor { output_idx: output.output_index, width: output.width, height: output.height, frame_index }],
        ))
    }

    async fn pair_with_status<D: BlockDevice>(&self, device: &D) -> Result<(), XcoderError> {
        let oracle = StatusOracle::new(device);
        oracle.query_and_record(&self.context).await?;
        Ok(())
    }

    /// Close the session (no distinct draining phase for the scaler).
    pub async fn close<D: BlockDevice>(&mut self, device: &D) -> Result<(), XcoderError> {
        let lba = encode(Operation::CloseSession, self.context.wire_session_id(), self.context.instance_type(), self.context.hw_channel());
        let buf = AlignedBuffer::zeroed(1);
        device.write_pages(lba, &buf).await.map_err(XcoderError::from)?;
        self.context.close();
        self.state = SessionState::Closed;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use xcoder_core::DeviceType;
    use xcoder_proto::metadata::MetadataLayout;

    fn ctx() -> Context {
        Context::new(DeviceType::Scaler, 3, 0, false, MetadataLayout::Current48, 0x30, 300)
    }

    fn descriptor(options: u8) -> FrameDescriptor {
        FrameDescriptor {
            width: 1920,
            height: 1080,
            format: 0,
            options,
            crop: CropRect::default(),
            rgba_color: 0,
            frame_index: 0,
            session_id: 3,
            output_index: 0,
        }
    }

    #[test]
    fn encode_into_round_trips_dimensions() {
        let mut buf = [0u8; DESCRIPTOR_LEN];
        descriptor(OPTION_IS_OUTPUT).encode_into(&mut buf);
        assert_eq!(u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]), 1920);
        assert_eq!(u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]), 1080);
        assert_eq!(buf[9], OPTION_IS_OUTPUT);
    }

    #[test]
    fn new_session_starts_opened() {
        let session = ScalerSession::new(ctx(), BlitMode::Simple);
        assert_eq!(session.state(), SessionState::Opened);
        assert_eq!(session.blit_mode(), BlitMode::Simple);
    }

    #[test]
    fn start_streaming_requires_configured_state() {
        let mut session = ScalerSession::new(ctx(), BlitMode::Simple);
        assert!(session.start_streaming().is_err());
    }
}
