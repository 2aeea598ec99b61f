use serdeconv;
use zoneserver::config::ZoneServerConfig;

fn main() {
    let config = serdeconv::to_toml_string(&ZoneServerConfig::default()).expect("Failed to generate config file");
    println!("{}", config);
}
