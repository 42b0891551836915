//! Serial port device manipulation.

use log::{debug, info};
use serialport::SerialPort;

use crate::Settings;

//==============================================================================
// Public Interface
//==============================================================================

/// Open the device named in `settings` and configure the line. Opening is
/// retried a few times with a fixed delay; boards that enumerate their USB
/// serial controller late need the grace period after plug-in.
pub fn open_and_setup_port(settings: &Settings) -> Result<Box<dyn SerialPort>, serialport::Error> {
    use retry::{delay, retry_with_index};

    let path = settings.path.clone().ok_or_else(|| {
        serialport::Error::new(serialport::ErrorKind::InvalidInput, "no device path given")
    })?;

    let result = retry_with_index(
        delay::Fixed::from_millis(1000).take(4),
        |index| -> Result<Box<dyn SerialPort>, serialport::Error> {
            debug!("Trying to connect {}", index);
            serialport::new(&path, settings.baud_rate)
                .data_bits(settings.data_bits)
                .stop_bits(settings.stop_bits)
                .parity(settings.parity)
                .flow_control(settings.flow_control)
                .open()
        },
    );
    match result {
        Ok(mut port) => {
            // Configure the port again with the values in `settings`; some
            // platform backends only apply line settings after `open`.
            port.set_baud_rate(settings.baud_rate)?;
            port.set_data_bits(settings.data_bits)?;
            port.set_stop_bits(settings.stop_bits)?;
            port.set_parity(settings.parity)?;
            port.set_flow_control(settings.flow_control)?;

            info!("Connected to {} at {} baud", path, settings.baud_rate);
            debug!("data_bits    : {:#?}", settings.data_bits);
            debug!("stop_bits    : {:#?}", settings.stop_bits);
            debug!("parity       : {:#?}", settings.parity);
            debug!("flow control : {:#?}", settings.flow_control);

            Ok(port)
        }
        Err(err) => match err {
            retry::Error::Operation {
                error,
                total_delay,
                tries,
            } => {
                info!(
                    "Failed to open the port after {:?} and {} tries: {}",
                    total_delay, tries, error,
                );
                Err(error)
            }
            retry::Error::Internal(_) => {
                info!("Internal retry error while opening port");
                Err(serialport::Error::new(
                    serialport::ErrorKind::Unknown,
                    "internal error while retrying to open the port",
                ))
            }
        },
    }
}
