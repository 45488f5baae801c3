pub const TOPIC_SENSOR_TEMP: &str = "thermostat/sensor/temperature";
pub const TOPIC_SENSOR_HUMIDITY: &str = "thermostat/sensor/humidity";
pub const TOPIC_SENSOR_PRESSURE: &str = "thermostat/sensor/pressure";
pub const TOPIC_SENSOR_STATUS: &str = "thermostat/sensor/status";

pub const TOPIC_CONTROLLER_STATE: &str = "thermostat/controller/state";
pub const TOPIC_CONTROLLER_STATUS: &str = "thermostat/controller/status";

pub const TOPIC_CMD_MODE: &str = "thermostat/cmnd/thermostat/mode";
pub const TOPIC_CMD_PROGRAM: &str = "thermostat/cmnd/thermostat/program";
pub const TOPIC_CMD_PRICE: &str = "thermostat/cmnd/thermostat/price";
