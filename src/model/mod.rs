//! Detection results: blocks, codec streams, fragments and result trees

mod block;
mod codec;
mod format;
mod fragment;
mod header;
mod results;

pub use block::{BlockBuilder, BlockParts, DataBlock};
pub use codec::{CodecStream, CodecStreamParts, StreamVerdict};
pub use format::DataFormat;
pub use fragment::{
    ContainerId, Fragment, FragmentArena, FragmentContainer, FragmentEntry, FragmentId, FragmentInfo,
};
pub use header::{HeaderSplice, ReferenceHeader};
pub use results::ResultNode;
