use std::sync::Mutex;

/// Fencing token captured when a block is handed to a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferFence {
    generation: u64,
    height: Option<u64>,
}

impl BufferFence {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Latest buffered height at the time the fence was taken.
    pub fn height(&self) -> Option<u64> {
        self.height
    }
}

#[derive(Debug, Default)]
struct BufferState {
    latest: Option<u64>,
    generation: u64,
}

/// Highest block height the buffering pipeline has queued, with a generation
/// that advances on every reset.
///
/// Moving the height backwards counts as a reset, so in-flight work fenced
/// before the move is recognised as stale.
#[derive(Debug, Default)]
pub struct BufferedHeight {
    state: Mutex<BufferState>,
}

impl BufferedHeight {
    pub fn new(initial: Option<u64>) -> Self {
        Self {
            state: Mutex::new(BufferState {
                latest: initial,
                generation: 0,
            }),
        }
    }

    pub fn latest(&self) -> Option<u64> {
        self.state.lock().unwrap().latest
    }

    pub fn generation(&self) -> u64 {
        self.state.lock().unwrap().generation
    }

    /// Records a new latest height. Returns true if this rewound the buffer.
    pub fn set(&self, height: u64) -> bool {
        let mut state = self.state.lock().unwrap();
        let rewound = state.latest.is_some_and(|previous| height < previous);
        if rewound {
            state.generation = state.generation.wrapping_add(1);
        }
        state.latest = Some(height);
        rewound
    }

    /// Discards everything buffered so far and restarts from `height`.
    pub fn reset(&self, height: Option<u64>) {
        let mut state = self.state.lock().unwrap();
        state.generation = state.generation.wrapping_add(1);
        state.latest = height;
    }

    pub fn fence(&self) -> BufferFence {
        let state = self.state.lock().unwrap();
        BufferFence {
            generation: state.generation,
            height: state.latest,
        }
    }

    pub fn is_stale(&self, fence: BufferFence) -> bool {
        self.state.lock().unwrap().generation != fence.generation
    }
}
