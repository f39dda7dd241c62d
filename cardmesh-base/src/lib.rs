mod bitmap256;
mod error;
mod ids;

pub use bitmap256::{Bitmap256, DoubleBitmap256};
pub use error::{err, kind_err, Error, ErrorKind, Result};
pub use ids::{PeerId, TxId, TxIdMinter};
