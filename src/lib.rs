// 核心模块
pub mod common;
pub mod config;
pub mod core;
pub mod logs; // 日志解析器
pub mod sequencer; // 有序提交

// RPC 模块 - 节点客户端与连接池
pub mod rpc;

// 业务服务 - 交易对/代币解析、价格
pub mod service;

// 输出端 - 缓存、存储、消息总线
pub mod sinks;

// 区块流水线
pub mod pipeline;

#[cfg(test)]
pub(crate) mod testing;

// 重新导出主要API
pub use config::Config;
pub use core::{BlockMessage, BlockResult, DexEvent, EventMetadata, Pair, ProtocolId, Token};
pub use logs::{DecodeError, TopicRegistry};
pub use pipeline::{BlockContext, BlockGetter, BlockParser, ParserDeps, PipelineError};
pub use rpc::{ChainClient, ClientPool, JsonRpcClient, RpcError};
pub use sequencer::{Sequenced, Sequencer, SequencerError};
pub use service::{PairService, PriceSource, ServiceError};
