//! Scripted audio sources for driving the capture loops without hardware.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use super::{AudioOpener, AudioSource, DeviceSelector};
use crate::error::{Result, VoteError};

/// Replays queued blocks, then optionally an endless constant signal.
#[derive(Debug, Clone)]
pub struct ScriptedSource {
    sample_rate: u32,
    blocks: VecDeque<Vec<f32>>,
    /// Amplitude of the signal produced once `blocks` is drained.
    /// `None` means the source goes quiet (reads return 0).
    tail: Option<f32>,
}

impl ScriptedSource {
    pub fn new(sample_rate: u32, blocks: Vec<Vec<f32>>, tail: Option<f32>) -> Self {
        Self {
            sample_rate,
            blocks: blocks.into(),
            tail,
        }
    }
}

impl AudioSource for ScriptedSource {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn read(&mut self, out: &mut [f32]) -> usize {
        if let Some(front) = self.blocks.front_mut() {
            let n = front.len().min(out.len());
            out[..n].copy_from_slice(&front[..n]);
            front.drain(..n);
            if front.is_empty() {
                self.blocks.pop_front();
            }
            return n;
        }
        match self.tail {
            Some(level) => {
                // 100 ms per read keeps sample-counted limits moving quickly.
                let n = out.len().min((self.sample_rate / 10).max(1) as usize);
                out[..n].fill(level);
                n
            }
            None => 0,
        }
    }
}

/// Opener that hands out [`ScriptedSource`]s and records each open.
#[derive(Debug, Clone)]
pub struct ScriptedOpener {
    /// Rates the fake device accepts.
    pub accepted_rates: Vec<u32>,
    pub blocks: Vec<Vec<f32>>,
    pub tail: Option<f32>,
    opens: Arc<AtomicUsize>,
    open_selectors: Arc<parking_lot::Mutex<Vec<Option<DeviceSelector>>>>,
}

impl ScriptedOpener {
    pub fn new(accepted_rates: Vec<u32>, blocks: Vec<Vec<f32>>, tail: Option<f32>) -> Self {
        Self {
            accepted_rates,
            blocks,
            tail,
            opens: Arc::new(AtomicUsize::new(0)),
            open_selectors: Arc::default(),
        }
    }

    /// A device that accepts every rate and produces endless silence.
    pub fn silent() -> Self {
        Self::new(Vec::new(), Vec::new(), Some(0.0))
    }

    /// Number of successful opens so far.
    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn selectors(&self) -> Vec<Option<DeviceSelector>> {
        self.open_selectors.lock().clone()
    }

    fn accepts(&self, rate: u32) -> bool {
        self.accepted_rates.is_empty() || self.accepted_rates.contains(&rate)
    }
}

impl AudioOpener for ScriptedOpener {
    fn open(
        &self,
        device: Option<&DeviceSelector>,
        preferred_rate: u32,
        fallback_rate: u32,
    ) -> Result<Box<dyn AudioSource>> {
        let rate = [preferred_rate, fallback_rate]
            .into_iter()
            .find(|r| self.accepts(*r))
            .ok_or_else(|| VoteError::AudioStream("no sample rate accepted".into()))?;
        self.opens.fetch_add(1, Ordering::SeqCst);
        self.open_selectors.lock().push(device.cloned());
        Ok(Box::new(ScriptedSource::new(
            rate,
            self.blocks.clone(),
            self.tail,
        )))
    }
}
