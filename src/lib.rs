pub mod backend;
pub mod board;
pub mod compiler;
pub mod config;
pub mod descriptor;
pub mod error;
pub mod events;
pub mod gpio;
pub mod io;
pub mod validation;

pub use config::{BoardConfig, RunMode, Settings, SlotConfig};
pub use descriptor::{EdgeDetect, PinDescriptor, PinKind, RawDescriptor};
pub use error::AppError;
pub use events::{EventBus, IoEvent};
pub use gpio::{
    BoardIo, GpioBackend, LineHandle, LineNotification, LineRef, PinState, StateMap, WatchBackoff,
    WatchSink,
};
pub use io::{IoHost, IoSnapshot};

#[cfg(feature = "hardware-gpio")]
pub use backend::LibgpiodBackend;
pub use backend::MockGpioBackend;
