/**
 * How long (milliseconds) a scan may run before the printer is reported as not found.
 */
pub const SCAN_TIMEOUT: u64 = 10_000;

/**
 * How long (milliseconds) opening the printer socket may take.
 */
pub const CONNECT_TIMEOUT: u64 = 10_000;

/**
 * How long (milliseconds) to wait after a device was found, before bonding or connecting.
 */
pub const SETTLE_DELAY: u64 = 1_000;

/**
 * Interval (milliseconds) between two countdown ticks.
 */
pub const TICK: u64 = 1_000;

/**
 * Maximum printable width of the paper, in pixels.
 */
pub const PRINT_WIDTH: u32 = 550;

/**
 * Height of the canvas an image is drawn on, in pixels.
 */
pub const CANVAS_HEIGHT: u32 = 10 * PRINT_WIDTH;

/**
 * Number of rows that are always printed; taller images add their height on top of this.
 */
pub const MIN_ROWS: u32 = 20;

pub const COMMAND_RASTER_IMAGE: [u8; 4] = [0x1D, 0x76, 0x30, 0x00]; // GS v 0, normal density

/**
 * Appended after every text line: line feed, carriage return, string terminator.
 */
pub const TEXT_TRAILER: [u8; 3] = [10, 13, 0];

/**
 * Largest payload (bytes) written to a BLE characteristic at once.
 */
pub const BLE_WRITE_CHUNK: usize = 180;
