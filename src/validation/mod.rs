// Offline validation of extracted values: UK plate formats and MOT dates.
// Nothing here touches the network; the DVLA client lives in `dvla`.

pub mod dates;
pub mod registration;
