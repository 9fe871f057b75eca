//! Reader and backend configuration from flags and environment

use std::error::Error;
use std::time::Duration;

use clap::{Args, ValueEnum};
use kiosk_keys::{parse_key, MifareKey};
use kiosk_nfc::sim::{SimulatedCard, SimulatedTransceiver};
use kiosk_nfc::{
    CardReader, KeyRing, PcscTransceiver, PollingConfig, RetryPolicy, Transceiver, Uid,
};
use tracing::info;

use crate::backend::{BackendClient, BackendError};

/// Reader behind a trait object, whatever the transport
pub type BoxedTransceiver = Box<dyn Transceiver + Send>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum Transport {
    /// PN532 on the Raspberry Pi I2C bus
    Pn532,
    /// PC/SC contactless reader (ACR122U)
    Pcsc,
    /// In-memory card, no hardware
    Sim,
}

#[derive(Args, Debug, Clone)]
pub struct ReaderArgs {
    /// Reader hardware to use
    #[arg(long, value_enum, env = "KIOSK_TRANSPORT", default_value_t = Transport::Pn532, global = true)]
    pub transport: Transport,

    /// I2C bus number of the PN532
    #[arg(long, env = "KIOSK_I2C_BUS", default_value_t = 1, global = true)]
    pub i2c_bus: u8,

    /// I2C address of the PN532
    #[arg(long, env = "KIOSK_I2C_ADDRESS", default_value = "0x24", value_parser = parse_address, global = true)]
    pub i2c_address: u8,

    /// Only use a PC/SC reader whose name contains this text
    #[arg(long, env = "KIOSK_PCSC_READER", global = true)]
    pub pcsc_reader: Option<String>,

    /// Pause between card polls in milliseconds
    #[arg(long, env = "KIOSK_POLL_INTERVAL_MS", default_value_t = 200, global = true)]
    pub poll_interval_ms: u64,

    /// How long one card detection may block, in milliseconds
    #[arg(long, env = "KIOSK_DETECT_TIMEOUT_MS", default_value_t = 100, global = true)]
    pub detect_timeout_ms: u64,

    /// Site keys tried after the standard keys (comma separated, 12 hex digits each)
    #[arg(long, env = "KIOSK_EXTRA_KEYS", value_delimiter = ',', value_parser = parse_key_arg, global = true)]
    pub extra_keys: Vec<MifareKey>,
}

impl ReaderArgs {
    pub fn open_transceiver(&self) -> Result<BoxedTransceiver, Box<dyn Error>> {
        match self.transport {
            Transport::Pn532 => open_pn532(self.i2c_bus, self.i2c_address),
            Transport::Pcsc => Ok(Box::new(PcscTransceiver::open(self.pcsc_reader.as_deref())?)),
            Transport::Sim => {
                let uid = Uid::new(&DEMO_UID).ok_or("invalid demo card UID")?;
                info!(%uid, "Using simulated reader with a demo guest card");
                Ok(Box::new(simulated_reader(uid)))
            }
        }
    }

    /// Open the configured reader with the standard and site keys
    pub fn open_reader(&self) -> Result<CardReader<BoxedTransceiver>, Box<dyn Error>> {
        let transceiver = self.open_transceiver()?;
        Ok(CardReader::new(transceiver).with_keys(KeyRing::with_vendor_keys(&self.extra_keys)))
    }

    pub fn detect_timeout(&self) -> Duration {
        Duration::from_millis(self.detect_timeout_ms)
    }

    pub fn polling_config(&self) -> PollingConfig {
        let interval = Duration::from_millis(self.poll_interval_ms);
        let defaults = PollingConfig::default();
        PollingConfig {
            interval,
            detect_timeout: self.detect_timeout(),
            recovery: RetryPolicy {
                backoff: interval,
                max_backoff: defaults.recovery.max_backoff.max(interval),
                ..defaults.recovery
            },
            ..defaults
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct BackendArgs {
    /// Base URL of the hotel backend API
    #[arg(long, env = "KIOSK_API_URL", global = true)]
    pub api_url: Option<String>,

    /// API key sent as X-API-KEY
    #[arg(long, env = "KIOSK_API_KEY", hide_env_values = true, global = true)]
    pub api_key: Option<String>,
}

impl BackendArgs {
    /// Backend client, if a URL was configured
    pub fn client(&self) -> Result<Option<BackendClient>, BackendError> {
        match &self.api_url {
            Some(url) => {
                let client = BackendClient::new(url, self.api_key.as_deref().unwrap_or_default())?;
                info!(url = client.base_url(), "Backend configured");
                Ok(Some(client))
            }
            None => Ok(None),
        }
    }
}

#[cfg(feature = "rpi")]
fn open_pn532(bus: u8, address: u8) -> Result<BoxedTransceiver, Box<dyn Error>> {
    let i2c = rppal::i2c::I2c::with_bus(bus)?;
    Ok(Box::new(kiosk_nfc::Pn532::open(i2c, address)?))
}

#[cfg(not(feature = "rpi"))]
fn open_pn532(_bus: u8, _address: u8) -> Result<BoxedTransceiver, Box<dyn Error>> {
    Err("built without I2C support, rebuild with the `rpi` feature or use --transport pcsc".into())
}

const DEMO_UID: [u8; 4] = [0xDE, 0xAD, 0xBE, 0xEF];

/// Demo card with credentials already on it
fn simulated_reader(uid: Uid) -> SimulatedTransceiver {
    SimulatedTransceiver::with_card(
        SimulatedCard::classic(uid)
            .with_text(5, "100200300")
            .with_text(6, "4242"),
    )
}

fn parse_address(text: &str) -> Result<u8, String> {
    let text = text.trim();
    let parsed = match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => u8::from_str_radix(hex, 16),
        None => text.parse(),
    };
    parsed.map_err(|e| format!("invalid I2C address '{}': {}", text, e))
}

fn parse_key_arg(text: &str) -> Result<MifareKey, String> {
    parse_key(text).ok_or_else(|| format!("'{}' is not a 6-byte hex key", text))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_address() {
        assert_eq!(parse_address("0x24"), Ok(0x24));
        assert_eq!(parse_address("36"), Ok(0x24));
        assert!(parse_address("0xZZ").is_err());
    }

    const SITE_KEY: MifareKey = [0x5C, 0x3B, 0x91, 0x07, 0xE2, 0x4D];

    #[test]
    fn test_sim_transport_reads_demo_card() {
        let args = ReaderArgs {
            transport: Transport::Sim,
            i2c_bus: 1,
            i2c_address: 0x24,
            pcsc_reader: None,
            poll_interval_ms: 250,
            detect_timeout_ms: 100,
            extra_keys: vec![SITE_KEY],
        };

        let mut reader = args.open_reader().unwrap();
        assert_eq!(
            reader.keys().candidates().len(),
            KeyRing::standard().candidates().len() + 2
        );
        assert_eq!(reader.keys().candidates()[8].key, SITE_KEY);

        let uid = reader.detect(Duration::ZERO).unwrap().unwrap();
        let session = reader.read_session(&uid);
        assert_eq!(session.credentials(), Some(("100200300", "4242")));

        let config = args.polling_config();
        assert_eq!(config.interval, Duration::from_millis(250));
        assert_eq!(config.recovery.backoff, Duration::from_millis(250));
        assert_eq!(config.recovery.max_backoff, kiosk_nfc::retry::DEFAULT_MAX_BACKOFF);

        let slow = ReaderArgs {
            poll_interval_ms: 5000,
            ..args
        };
        let recovery = slow.polling_config().recovery;
        assert_eq!(recovery.delay_for(100), Duration::from_millis(5000));
    }

    #[test]
    fn test_parse_key_arg() {
        assert_eq!(parse_key_arg("A0A1A2A3A4A5"), Ok([0xA0, 0xA1, 0xA2, 0xA3, 0xA4, 0xA5]));
        assert!(parse_key_arg("A0A1").is_err());
    }
}
