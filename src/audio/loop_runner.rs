use crate::audio::backend::PcmDevice;
use crate::audio::error::PlaybackError;
use crate::audio::state_manager::{lock, CancellationToken, GateOutcome, PlaybackPhase, PlaybackStateManager};
use crate::audio::stream::{PcmSource, StreamDescriptor};
use std::io::{self, Read, Seek, SeekFrom};
use std::sync::Mutex;
use tracing::{debug, info, instrument, trace, warn};

const LOG_TARGET: &str = "pcm_player::audio::loop_runner";

/// Indicates the reason why the playback loop terminated successfully.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum PlaybackLoopExitReason {
    EndOfStream,
    Cancelled,
    Disposed,
}

/// The source being played and its layout.
pub(crate) struct ActiveStream {
    pub source: Box<dyn PcmSource>,
    pub descriptor: StreamDescriptor,
}

impl ActiveStream {
    /// Moves the source to the PCM offset for `ms`.
    pub fn reposition(&mut self, ms: i64) -> io::Result<u64> {
        let offset = self.descriptor.offset_for_ms(ms);
        self.source.seek(SeekFrom::Start(offset))
    }

    /// Reads whole frames into `buf`, stopping at the end of the PCM data.
    fn read_frames(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let position = self.source.stream_position()?;
        let remaining = self.descriptor.data_end().saturating_sub(position);
        let wanted = buf.len().min(usize::try_from(remaining).unwrap_or(usize::MAX));

        let mut filled = 0;
        while filled < wanted {
            match self.source.read(&mut buf[filled..wanted]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        let frame_bytes = usize::from(self.descriptor.block_align.max(1));
        Ok(filled - filled % frame_bytes)
    }
}

enum WriteOutcome {
    Written,
    /// The block was read before a reposition and was not written.
    Stale,
    /// The device was taken away by disposal.
    DeviceClosed,
}

/// The streaming loop: reads one block at a time from the active stream and
/// writes it to the device, honouring the pause gate.
pub(crate) struct FrameWriter<'a, D: PcmDevice> {
    device: &'a Mutex<Option<D>>,
    stream: &'a Mutex<Option<ActiveStream>>,
    state: &'a PlaybackStateManager,
    cancel: &'a CancellationToken,
    frame_bytes: usize,
    block_bytes: usize,
}

impl<'a, D: PcmDevice> FrameWriter<'a, D> {
    pub fn new(
        device: &'a Mutex<Option<D>>,
        stream: &'a Mutex<Option<ActiveStream>>,
        state: &'a PlaybackStateManager,
        cancel: &'a CancellationToken,
        frame_bytes: usize,
        period_frames: usize,
    ) -> Self {
        let frame_bytes = frame_bytes.max(1);
        Self {
            device,
            stream,
            state,
            cancel,
            frame_bytes,
            block_bytes: frame_bytes * period_frames.max(1),
        }
    }

    /// Runs until end of data, cancellation or disposal. A device write
    /// failure aborts the loop with the error.
    #[instrument(skip(self), name = "playback_loop", fields(block_bytes = self.block_bytes))]
    pub fn run(&self) -> Result<PlaybackLoopExitReason, PlaybackError> {
        info!(target: LOG_TARGET, "Starting playback loop.");
        let mut block = vec![0u8; self.block_bytes];
        let mut blocks_written: u64 = 0;

        let reason = loop {
            if self.state.is_disposed() {
                break PlaybackLoopExitReason::Disposed;
            }
            if self.cancel.is_cancelled() {
                break PlaybackLoopExitReason::Cancelled;
            }

            let (len, generation) = self.read_block(&mut block)?;
            if len == 0 {
                break PlaybackLoopExitReason::EndOfStream;
            }

            // A pause that landed since the last write still owes its drop.
            self.settle_pause()?;
            match self.state.wait_gate(self.cancel) {
                GateOutcome::Open => {}
                GateOutcome::Cancelled => break PlaybackLoopExitReason::Cancelled,
                GateOutcome::Disposed => break PlaybackLoopExitReason::Disposed,
            }

            match self.write_block(&block[..len], generation)? {
                WriteOutcome::Written => blocks_written += 1,
                WriteOutcome::Stale => {
                    trace!(target: LOG_TARGET, "Discarding block read before reposition.");
                    continue;
                }
                WriteOutcome::DeviceClosed => break PlaybackLoopExitReason::Disposed,
            }

            self.settle_pause()?;
        };

        info!(target: LOG_TARGET, "Playback loop finished: {:?} after {} blocks.", reason, blocks_written);
        Ok(reason)
    }

    fn read_block(&self, buf: &mut [u8]) -> Result<(usize, u64), PlaybackError> {
        let mut stream = lock(self.stream);
        // Repositions bump the generation under this same lock.
        let generation = self.state.generation();
        let len = match stream.as_mut() {
            Some(active) => active.read_frames(buf)?,
            None => 0,
        };
        Ok((len, generation))
    }

    fn write_block(&self, block: &[u8], generation: u64) -> Result<WriteOutcome, PlaybackError> {
        let mut guard = lock(self.device);
        let Some(device) = guard.as_mut() else {
            debug!(target: LOG_TARGET, "Device closed under the loop.");
            return Ok(WriteOutcome::DeviceClosed);
        };
        if self.state.generation() != generation {
            return Ok(WriteOutcome::Stale);
        }

        let mut offset = 0;
        while offset < block.len() {
            let frames = device.write_interleaved(&block[offset..], self.frame_bytes)?;
            if frames == 0 {
                warn!(target: LOG_TARGET, "Device accepted no frames, dropping rest of block.");
                break;
            }
            offset += frames * self.frame_bytes;
        }
        Ok(WriteOutcome::Written)
    }

    /// Turns `JustPaused` into `Paused` and drops the device buffer, once per
    /// pause.
    fn settle_pause(&self) -> Result<(), PlaybackError> {
        let mut transport = self.state.transport();
        if transport.phase != PlaybackPhase::JustPaused {
            return Ok(());
        }
        transport.phase = PlaybackPhase::Paused;
        if let Some(device) = lock(self.device).as_mut() {
            device.drop_buffer()?;
            debug!(target: LOG_TARGET, "Pause settled, device buffer dropped.");
        }
        Ok(())
    }
}
