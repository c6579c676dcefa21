pub mod au;
pub mod bitwriter;
pub mod cabac;
pub mod config;
pub mod ctu;
pub mod eg;
pub mod filter;
pub mod frame;
pub mod nal;
pub mod picture;
pub mod pps;
pub mod sao;
pub mod sei;
pub mod slice;
pub mod sps;
pub mod vps;
pub mod wavefront;
pub mod wp;

pub use au::AccessUnit;
pub use cabac::{Bin, CabacCoder, ContextTable, RdoScratch};
pub use config::{EncoderConfig, GopEntry, ScalingListMode};
pub use ctu::{CtuAnalyzer, CtuInfo, CtuRecord};
pub use filter::{FrameFilter, LoopFilterKernels, NoopKernels};
pub use frame::FrameEncoder;
pub use nal::{NalUnit, NalUnitType};
pub use picture::{MotionReference, Picture, Plane, Reference};
pub use sao::{SaoCtuParam, SaoParams};
pub use sei::{SeiMessage, SeiPayload};
pub use slice::{Slice, SliceType};
pub use wp::WeightParam;

use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum Error {
    #[error("unsupported scaling list mode {0}")]
    UnsupportedScalingList(u32),
    #[error("lossless coding cannot combine with a GOP QP offset")]
    LosslessQpOffset,
    #[error("picture has no CTU rows")]
    EmptyPicture,
    #[error("invalid configuration: {0}")]
    ConfigError(String),
    #[error("wavefront queue cannot hold {0} rows")]
    QueueInit(usize),
    #[error("substream of {0} bytes exceeds the entry point offset field")]
    StreamOverflow(usize),
    #[error("bitstream error: {0}")]
    BitstreamError(String),
    #[error("internal state error: {0}")]
    InternalState(String),
}

pub type Result<T> = std::result::Result<T, Error>;
