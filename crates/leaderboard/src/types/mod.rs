mod lap_time;
mod player_name;
mod record_id;
mod stage_number;

pub use lap_time::{LapTime, MAX_LAP_TIME};
pub use player_name::{PlayerName, MAX_PLAYER_NAME_CHARS};
pub use record_id::{RecordId, ReplayId};
pub use stage_number::{StageNumber, MAX_STAGE, MIN_STAGE};
