//! AI inference session (§4.5.5): loads a network binary (with SHA-256
//! cache matching against whatever firmware already holds), reads back
//! the network's fixed input/output tensor shapes, then runs one-shot
//! inference.

use sha2::{Digest, Sha256};
use xcoder_core::{AlignedBuffer, BlockDevice, Context, StatusOracle, XcoderError};
use xcoder_proto::{encode, Operation};

use super::state::{InvalidStateError, SessionState};

/// Hardware alignment every per-layer tensor offset is rounded up to
/// (§4.5.5: "offsets sized to 64-byte hardware alignment").
const TENSOR_ALIGNMENT: u64 = 64;

const NETWORK_HEADER_LEN: usize = 8 + 32; // size + sha256 digest
const LAYER_RECORD_LEN: usize = 24;

/// One input or output tensor descriptor (§4.5.5:
/// `{num_of_dims, sizes[4], data_format, quant_format}`), plus the byte
/// offset this library computed for it within the tensor buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TensorDescriptor {
    /// Number of dimensions actually populated in `sizes`.
    pub num_of_dims: u8,
    /// Dimension sizes, padded with zeros past `num_of_dims`.
    pub sizes: [u32; 4],
    /// Tensor element format (codec-specific encoding).
    pub data_format: u8,
    /// Quantization format (codec-specific encoding).
    pub quant_format: u8,
    /// Byte offset of this tensor within its input/output buffer,
    /// rounded up to [`TENSOR_ALIGNMENT`].
    pub offset: u64,
}

impl TensorDescriptor {
    fn byte_len(self) -> u64 {
        let elements: u64 = self.sizes[..self.num_of_dims as usize].iter().map(|&d| u64::from(d)).product();
        elements.max(1) * 4
    }

    fn parse_record(record: &[u8]) -> Self {
        Self {
            num_of_dims: record[0],
            data_format: record[1],
            quant_format: record[2],
            sizes: [
                u32::from_le_bytes([record[4], record[5], record[6], record[7]]),
                u32::from_le_bytes([record[8], record[9], record[10], record[11]]),
                u32::from_le_bytes([record[12], record[13], record[14], record[15]]),
                u32::from_le_bytes([record[16], record[17], record[18], record[19]]),
            ],
            offset: 0,
        }
    }
}

fn round_up(value: u64, alignment: u64) -> u64 {
    value.div_ceil(alignment) * alignment
}

fn assign_offsets(mut layers: Vec<TensorDescriptor>) -> Vec<TensorDescriptor> {
    let mut cursor = 0u64;
    for layer in &mut layers {
        layer.offset = cursor;
        cursor += round_up(layer.byte_len(), TENSOR_ALIGNMENT);
    }
    layers
}

/// The AI inference session state machine (§4.5.5).
pub struct AiSession {
    context: Context,
    state: SessionState,
    input_layers: Vec<TensorDescriptor>,
    output_layers: Vec<TensorDescriptor>,
}

impl AiSession {
    /// Wrap a freshly opened context as an AI session.
    #[must_use]
    pub fn new(context: Context) -> Self {
        Self { context, state: SessionState::Opened, input_layers: Vec::new(), output_layers: Vec::new() }
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Input tensor descriptors, populated after [`Self::read_inout_layers`].
    #[must_use]
    pub fn input_layers(&self) -> &[TensorDescriptor] {
        &self.input_layers
    }

    /// Output tensor descriptors, populated after [`Self::read_inout_layers`].
    #[must_use]
    pub fn output_layers(&self) -> &[TensorDescriptor] {
        &self.output_layers
    }

    /// Load a network binary, transitioning `Opened → Configured`
    /// (§4.5.5). Returns `true` if firmware already held an identical
    /// binary (matched by SHA-256) and the body upload was skipped.
    pub async fn config_network_binary<D: BlockDevice>(&mut self, device: &D, blob: &[u8]) -> Result<bool, XcoderError> {
        self.state.expect(&[SessionState::Opened])?;

        let digest = Sha256::digest(blob);
        let mut header = AlignedBuffer::zeroed(NETWORK_HEADER_LEN);
        {
            let bytes = header.as_mut_slice();
            bytes[0..8].copy_from_slice(&(blob.len() as u64).to_le_bytes());
            bytes[8..40].copy_from_slice(digest.as_slice());
        }
        let header_lba = encode(Operation::SetAiParams, self.context.wire_session_id(), self.context.instance_type(), self.context.hw_channel());
        device.write_pages(header_lba, &header).await.map_err(XcoderError::from)?;
        self.pair_with_status(device).await?;

        let cached = self.query_network_layer_size(device).await? > 0;
        if !cached {
            let page_rounded = page_round(blob.len());
            let mut body = AlignedBuffer::zeroed(page_rounded);
            body.as_mut_slice()[..blob.len()].copy_from_slice(blob);
            let write_lba = encode(Operation::WriteInstance, self.context.wire_session_id(), self.context.instance_type(), self.context.hw_channel());
            device.write_pages(write_lba, &body).await.map_err(XcoderError::from)?;
            self.pair_with_status(device).await?;
        }

        self.state = SessionState::Configured;
        Ok(cached)
    }

    async fn query_network_layer_size<D: BlockDevice>(&self, device: &D) -> Result<u32, XcoderError> {
        let lba = encode(Operation::QueryNetworkLayerSize, self.context.wire_session_id(), self.context.instance_type(), self.context.hw_channel());
        let mut buf = AlignedBuffer::zeroed(1);
        device.read_pages(lba, &mut buf).await.map_err(XcoderError::from)?;
        self.pair_with_status(device).await?;
        let bytes: &[u8] = &buf;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Read the network's fixed input/output tensor descriptors
    /// (§4.5.5). The wire record is `[num_inputs: u8][num_outputs: u8]`
    /// followed by that many fixed-size layer records, inputs first.
    pub async fn read_inout_layers<D: BlockDevice>(&mut self, device: &D) -> Result<(), XcoderError> {
        self.state.expect(&[SessionState::Configured])?;

        let lba = encode(Operation::QueryNetworkLayer, self.context.wire_session_id(), self.context.instance_type(), self.context.hw_channel());
        let mut buf = AlignedBuffer::zeroed(1);
        device.read_pages(lba, &mut buf).await.map_err(XcoderError::from)?;
        self.pair_with_status(device).await?;

        let bytes: &[u8] = &buf;
        let num_inputs = bytes[0] as usize;
        let num_outputs = bytes[1] as usize;
        let mut offset = 2;

        let mut inputs = Vec::with_capacity(num_inputs);
        for _ in 0..num_inputs {
            inputs.push(TensorDescriptor::parse_record(&bytes[offset..offset + LAYER_RECORD_LEN]));
            offset += LAYER_RECORD_LEN;
        }
        let mut outputs = Vec::with_capacity(num_outputs);
        for _ in 0..num_outputs {
            outputs.push(TensorDescriptor::parse_record(&bytes[offset..offset + LAYER_RECORD_LEN]));
            offset += LAYER_RECORD_LEN;
        }

        self.input_layers = assign_offsets(inputs);
        self.output_layers = assign_offsets(outputs);
        Ok(())
    }

    /// Begin streaming, transitioning `Configured → Streaming`.
    pub fn start_streaming(&mut self) -> Result<(), InvalidStateError> {
        self.state.expect(&[SessionState::Configured])?;
        self.state = SessionState::Streaming;
        Ok(())
    }

    /// Write exactly one input-tensor-sized buffer (§4.5.5 inference).
    pub async fn write<D: BlockDevice>(&mut self, device: &D, input_frame: &[u8]) -> Result<(), XcoderError> {
        self.state.expect(&[SessionState::Streaming])?;
        let page_rounded = page_round(input_frame.len());
        let mut buf = AlignedBuffer::zeroed(page_rounded);
        buf.as_mut_slice()[..input_frame.len()].copy_from_slice(input_frame);
        let lba = encode(Operation::WriteInstance, self.context.wire_session_id(), self.context.instance_type(), self.context.hw_channel());
        device.write_pages(lba, &buf).await.map_err(XcoderError::from)?;
        self.pair_with_status(device).await
    }

    /// Read exactly one output-tensor-sized buffer (§4.5.5 inference).
    pub async fn read<D: BlockDevice>(&mut self, device: &D) -> Result<Vec<u8>, XcoderError> {
        self.state.expect(&[SessionState::Streaming])?;
        let total_len: u64 = self.output_layers.iter().map(|l| l.offset + round_up(l.byte_len(), TENSOR_ALIGNMENT)).max().unwrap_or(0);
        let mut buf = AlignedBuffer::zeroed(page_round(total_len as usize));
        let lba = encode(Operation::ReadInstance, self.context.wire_session_id(), self.context.instance_type(), self.context.hw_channel());
        device.read_pages(lba, &mut buf).await.map_err(XcoderError::from)?;
        self.pair_with_status(device).await?;
        let bytes: &[u8] = &buf;
        Ok(bytes[..total_len as usize].to_vec())
    }

    async fn pair_with_status<D: BlockDevice>(&self, device: &D) -> Result<(), XcoderError> {
        let oracle = StatusOracle::new(device);
        oracle.query_and_record(&self.context).await?;
        Ok(())
    }

    /// Close the session.
    pub async fn close<D: BlockDevice>(&mut self, device: &D) -> Result<(), XcoderError> {
        let lba = encode(Operation::CloseSession, self.context.wire_session_id(), self.context.instance_type(), self.context.hw_channel());
        let buf = AlignedBuffer::zeroed(1);
        device.write_pages(lba, &buf).await.map_err(XcoderError::from)?;
        self.context.close();
        self.state = SessionState::Closed;
        Ok(())
    }
}

fn page_round(len: usize) -> usize {
    len.div_ceil(xcoder_proto::lba::PAGE_SIZE as usize).max(1)
}
