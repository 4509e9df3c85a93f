pub mod analysis;
pub mod candle;
pub mod coin;
pub mod sync;
pub mod time;
pub mod timeframe;

pub use analysis::*;
pub use candle::*;
pub use coin::*;
pub use sync::*;
pub use timeframe::*;
