use uuid::{uuid, Uuid};

/// Heart Rate Service.
pub const HRS_UUID: Uuid = uuid!("0000180d-0000-1000-8000-00805f9b34fb");
/// Heart Rate Measurement characteristic (notify).
pub const HRM_UUID: Uuid = uuid!("00002a37-0000-1000-8000-00805f9b34fb");

const FLAG_RATE_U16: u8 = 0b0000_0001;
const FLAG_CONTACT_DETECTED: u8 = 0b0000_0010;
const FLAG_CONTACT_SUPPORTED: u8 = 0b0000_0100;
const FLAG_ENERGY_EXPENDED: u8 = 0b0000_1000;
const FLAG_RR_INTERVALS: u8 = 0b0001_0000;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HeartRateError {
    #[error("Heart rate error: invalid length (expected at least {expected} bytes, got {actual})")]
    InvalidLength { expected: usize, actual: usize },
}

fn read_u16(data: &[u8], offset: usize) -> Result<u16, HeartRateError> {
    match data.get(offset..offset + 2) {
        Some(bytes) => Ok(u16::from_le_bytes([bytes[0], bytes[1]])),
        None => Err(HeartRateError::InvalidLength {
            expected: offset + 2,
            actual: data.len(),
        }),
    }
}

/// A decoded Heart Rate Measurement notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeartRate {
    bpm: u16,
    sensor_contact: Option<bool>,
    energy_expended: Option<u16>,
    rr: Vec<u16>,
}

impl HeartRate {
    /// Decode the raw characteristic value.
    pub fn new(data: &[u8]) -> Result<HeartRate, HeartRateError> {
        if data.len() < 2 {
            return Err(HeartRateError::InvalidLength {
                expected: 2,
                actual: data.len(),
            });
        }
        let flags = data[0];

        let (bpm, mut offset) = if flags & FLAG_RATE_U16 != 0 {
            (read_u16(data, 1)?, 3)
        } else {
            (u16::from(data[1]), 2)
        };

        let sensor_contact = if flags & FLAG_CONTACT_SUPPORTED != 0 {
            Some(flags & FLAG_CONTACT_DETECTED != 0)
        } else {
            None
        };

        let energy_expended = if flags & FLAG_ENERGY_EXPENDED != 0 {
            let energy = read_u16(data, offset)?;
            offset += 2;
            Some(energy)
        } else {
            None
        };

        let mut rr = vec![];
        if flags & FLAG_RR_INTERVALS != 0 {
            // rr values are stored as 1024ths of a second, convert to ms
            while offset + 2 <= data.len() {
                let raw = read_u16(data, offset)?;
                rr.push(((u32::from(raw) * 1000) / 1024) as u16);
                offset += 2;
            }
        }

        Ok(HeartRate {
            bpm,
            sensor_contact,
            energy_expended,
            rr,
        })
    }

    pub fn from_parts(bpm: u16, sensor_contact: Option<bool>) -> HeartRate {
        HeartRate {
            bpm,
            sensor_contact,
            energy_expended: None,
            rr: vec![],
        }
    }

    /// Get BPM of heart rate measurement
    pub fn bpm(&self) -> u16 {
        self.bpm
    }

    /// `None` when the strap does not report skin contact at all.
    pub fn sensor_contact(&self) -> Option<bool> {
        self.sensor_contact
    }

    /// Cumulative energy expended in kJ, when present.
    pub fn energy_expended(&self) -> Option<u16> {
        self.energy_expended
    }

    /// RR intervals in milliseconds
    pub fn rr(&self) -> &[u16] {
        &self.rr
    }
}
