//! SX127x LoRa module driver for Raspberry Pi gateways, wired over
//! SPI0 with `rppal`. Only compiled with the `sx127x` feature; other
//! builds select the `none` driver or plug in their own transceiver.

use common::{GatewayError, GatewayResult, RadioFrame, RadioSettings, RadioTransceiver};
use rppal::gpio::{Gpio, OutputPin};
use rppal::hal::Delay;
use rppal::spi::{Bus, Mode, SlaveSelect, Spi};
use sx127x_lora::LoRa;
use tracing::debug;

const SPI_CLOCK_HZ: u32 = 8_000_000;
const MAX_PAYLOAD: usize = 255;
// PA_BOOST output, the wiring on the supported module boards
const TX_PIN: u8 = 1;

pub struct Sx127xTransceiver {
    driver: Option<LoRa<Spi, OutputPin, OutputPin>>,
    delay: Delay,
    /// Payload length reported by the last successful IRQ poll.
    pending_len: usize,
}

impl Sx127xTransceiver {
    pub fn new() -> Self {
        Self {
            driver: None,
            delay: Delay::new(),
            pending_len: 0,
        }
    }

    fn driver_mut(&mut self) -> GatewayResult<&mut LoRa<Spi, OutputPin, OutputPin>> {
        self.driver
            .as_mut()
            .ok_or_else(|| GatewayError::Radio("radio is not configured".to_string()))
    }
}

impl Default for Sx127xTransceiver {
    fn default() -> Self {
        Self::new()
    }
}

impl RadioTransceiver for Sx127xTransceiver {
    fn configure(&mut self, settings: &RadioSettings) -> GatewayResult<()> {
        let spi = Spi::new(Bus::Spi0, SlaveSelect::Ss0, SPI_CLOCK_HZ, Mode::Mode0)
            .map_err(|e| GatewayError::Configuration(format!("failed to open SPI bus: {e}")))?;
        let gpio = Gpio::new()
            .map_err(|e| GatewayError::Configuration(format!("failed to open GPIO: {e}")))?;
        let cs = gpio
            .get(settings.pins.chip_select)
            .map_err(|e| GatewayError::Configuration(format!("bad chip-select pin: {e}")))?
            .into_output();
        let reset = gpio
            .get(settings.pins.reset)
            .map_err(|e| GatewayError::Configuration(format!("bad reset pin: {e}")))?
            .into_output();

        let mut driver = LoRa::new(
            spi,
            cs,
            reset,
            settings.frequency_mhz_rounded(),
            &mut self.delay,
        )
        .map_err(|e| GatewayError::Configuration(format!("failed to init SX127x: {e:?}")))?;

        driver
            .set_tx_power(settings.tx_power, TX_PIN)
            .map_err(|e| GatewayError::Configuration(format!("failed to set TX power: {e:?}")))?;
        driver
            .set_spreading_factor(settings.spreading_factor)
            .map_err(|e| {
                GatewayError::Configuration(format!("failed to set spreading factor: {e:?}"))
            })?;
        driver
            .set_signal_bandwidth(settings.bandwidth_hz as i64)
            .map_err(|e| GatewayError::Configuration(format!("failed to set bandwidth: {e:?}")))?;
        driver
            .set_coding_rate_4(settings.coding_rate)
            .map_err(|e| GatewayError::Configuration(format!("failed to set coding rate: {e:?}")))?;

        self.driver = Some(driver);
        Ok(())
    }

    fn available(&mut self) -> bool {
        let Ok(driver) = self.driver_mut() else {
            return false;
        };
        // Short poll so the receive loop keeps its own cadence
        let mut delay = Delay::new();
        match driver.poll_irq(Some(1), &mut delay) {
            Ok(len) => {
                self.pending_len = len;
                true
            }
            Err(_) => false,
        }
    }

    fn receive(&mut self) -> GatewayResult<RadioFrame> {
        let len = self.pending_len.min(MAX_PAYLOAD);
        self.pending_len = 0;

        let driver = self.driver_mut()?;
        let buffer = driver
            .read_packet()
            .map_err(|e| GatewayError::Radio(format!("failed to read packet: {e:?}")))?;
        let rssi = driver
            .get_packet_rssi()
            .map_err(|e| GatewayError::Radio(format!("failed to read RSSI: {e:?}")))?;
        let snr = driver
            .get_packet_snr()
            .map_err(|e| GatewayError::Radio(format!("failed to read SNR: {e:?}")))?;

        debug!(len, rssi, snr, "decoded SX127x frame");
        Ok(RadioFrame {
            payload: buffer[..len].to_vec(),
            rssi: rssi as i16,
            snr: snr as f32,
        })
    }

    fn send(&mut self, data: &[u8]) -> GatewayResult<()> {
        if data.len() > MAX_PAYLOAD {
            return Err(GatewayError::Radio(format!(
                "payload of {} bytes exceeds the {MAX_PAYLOAD} byte frame limit",
                data.len()
            )));
        }

        let mut buffer = [0u8; MAX_PAYLOAD];
        buffer[..data.len()].copy_from_slice(data);

        let driver = self.driver_mut()?;
        driver
            .transmit_payload(buffer, data.len())
            .map_err(|e| GatewayError::Radio(format!("transmission failed: {e:?}")))?;
        Ok(())
    }
}
