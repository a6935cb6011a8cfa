use uuid::Uuid;

/**
 * How long (milliseconds) a scan runs before it is stopped automatically.
 */
pub const SCAN_PERIOD: u64 = 10000;

/**
 * How long (milliseconds) establishing a connection to the peripheral may take.
 */
pub const CONNECT_DEADLINE: u64 = 10000;

/**
 * How long (milliseconds) discovering the services of the peripheral may take.
 */
pub const DISCOVER_DEADLINE: u64 = 5000;

/**
 * How long (milliseconds) a write to a characteristic may take.
 */
pub const WRITE_DEADLINE: u64 = 2000;

/**
 * How long (milliseconds) disconnecting from the peripheral may take.
 */
pub const DISCONNECT_DEADLINE: u64 = 2000;

/**
 * Only a peripheral advertising exactly this name is synchronised.
 */
pub const TARGET_NAME: &str = "CWatch";

/**
 * Displayed for peripherals that did not advertise a name (yet).
 */
pub const UNKNOWN_NAME: &str = "(unknown)";

/**
 * The UUID of the Bluetooth BLE service holding the time characteristics ("raw time service").
 */
pub const RAW_TIME_SERVICE: Uuid = Uuid::from_u128(0x00001805_0000_1000_8000_00805f9b34fb);

/**
 * The characteristic receiving month, day, year, hour, minute and second.
 */
pub const DAY_DATE_TIME_CHARACTERISTIC: Uuid = Uuid::from_u128(0x00002a0a_0000_1000_8000_00805f9b34fb);

/**
 * The characteristic receiving the day of the week, written after the date/time.
 */
pub const DAY_OF_WEEK_CHARACTERISTIC: Uuid = Uuid::from_u128(0x00002a09_0000_1000_8000_00805f9b34fb);
