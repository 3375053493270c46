//! # Protocol Configuration & Constants
//!
//! Every magic number in the marketplace lives here. If you're hardcoding a
//! constant somewhere else, you're doing it wrong and you owe the team coffee.
//!
//! Some of these values end up inside request-id preimages (the domain name
//! and version). Changing those after launch changes every id a requester
//! signs off-chain, so treat them as frozen.

// ---------------------------------------------------------------------------
// Chain Identifiers
// ---------------------------------------------------------------------------

/// Mainnet chain id. Mistakes here cost real money.
pub const CHAIN_ID_MAINNET: u64 = 0x4D45_4348; // "MECH"

/// Testnet chain id.
pub const CHAIN_ID_TESTNET: u64 = 0x4D45_4354; // "MECT"

/// Devnet chain id. Reset whenever someone feels like it.
pub const CHAIN_ID_DEVNET: u64 = 0x4D45_4344; // "MECD"

/// Human-readable prefix for Bech32 account addresses.
pub const ADDRESS_HRP: &str = "mech";

// ---------------------------------------------------------------------------
// Domain Separation
// ---------------------------------------------------------------------------

/// Name bound into every domain separator.
pub const DOMAIN_NAME: &str = "MechMarketplace";

/// Version bound into every domain separator. Bump it and every request id
/// changes, which is exactly what you want after a breaking upgrade.
pub const DOMAIN_VERSION: &str = "1.1.0";

/// Type tag hashed into the domain separator preimage.
pub const DOMAIN_TYPE_TAG: &str =
    "EIP712Domain(string name,string version,uint256 chainId,address verifyingContract)";

/// Type tag hashed into the request-id preimage.
pub const REQUEST_TYPE_TAG: &str = "Request(address requester,bytes data,uint256 nonce)";

// ---------------------------------------------------------------------------
// Fee Parameters
// ---------------------------------------------------------------------------

/// Fee basis: 10_000 = 100%. Fees are expressed in basis points of this.
pub const MAX_FEE_FACTOR: u16 = 10_000;

/// Default marketplace fee: 1%.
pub const DEFAULT_FEE_BPS: u16 = 100;

/// Smallest mech balance that can be paid out. Below 2 units the fee and
/// the payout cannot both be non-zero.
pub const MIN_PAYABLE_BALANCE: u64 = 2;

/// Fixed-point scale for the subscription credit-to-token ratio.
/// A ratio of `CREDIT_RATIO_SCALE` means one credit settles as one unit.
pub const CREDIT_RATIO_SCALE: u128 = 1_000_000;

// ---------------------------------------------------------------------------
// Timing Parameters
// ---------------------------------------------------------------------------

/// Largest timestamp (seconds) a response deadline may reach. Deadlines are
/// stored in a 32-bit slot on the reference chain, so anything past this
/// overflows.
pub const MAX_TIMESTAMP: u64 = u32::MAX as u64;

/// Default minimum response timeout in seconds.
pub const DEFAULT_MIN_RESPONSE_TIMEOUT: u64 = 60;

/// Default maximum response timeout in seconds (one week).
pub const DEFAULT_MAX_RESPONSE_TIMEOUT: u64 = 7 * 24 * 60 * 60;

/// Signed node calls older than this many seconds are rejected.
pub const CALL_EXPIRY_WINDOW_SECS: u64 = 300;

// ---------------------------------------------------------------------------
// Limits
// ---------------------------------------------------------------------------

/// Maximum number of items accepted in a single batch call.
pub const MAX_BATCH_SIZE: usize = 256;

/// Maximum page size for undelivered-request pagination.
pub const MAX_PAGE_SIZE: usize = 1_000;

// ---------------------------------------------------------------------------
// Node Parameters
// ---------------------------------------------------------------------------

/// Default RPC API port.
pub const DEFAULT_RPC_PORT: u16 = 9841;

/// Default metrics (Prometheus) port.
pub const DEFAULT_METRICS_PORT: u16 = 9842;

/// Protocol version string reported by the node.
pub const PROTOCOL_VERSION: &str = "0.1.0";

// ---------------------------------------------------------------------------
// Utility
// ---------------------------------------------------------------------------

/// Returns a friendly name for a chain id, mainly for logging.
/// Unknown chains get a hex dump because we're helpful like that.
pub fn chain_name(chain_id: u64) -> String {
    match chain_id {
        CHAIN_ID_MAINNET => "mainnet".to_string(),
        CHAIN_ID_TESTNET => "testnet".to_string(),
        CHAIN_ID_DEVNET => "devnet".to_string(),
        other => format!("unknown(0x{:08X})", other),
    }
}

/// Parses a network name into its chain id.
pub fn chain_id_for_network(name: &str) -> Option<u64> {
    match name.to_lowercase().as_str() {
        "mainnet" => Some(CHAIN_ID_MAINNET),
        "testnet" => Some(CHAIN_ID_TESTNET),
        "devnet" => Some(CHAIN_ID_DEVNET),
        _ => None,
    }
}
