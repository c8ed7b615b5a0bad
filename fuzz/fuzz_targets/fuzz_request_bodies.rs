#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let _ = dds_server::criteria::SearchCriteria::from_body(data);

    let (name, rest) = dds_server::admin::decode_name_field(data);
    assert!(rest.len() <= data.len());
    let _ = dds_server::admin::ConfigName::parse(&name);
    let _ = dds_server::admin::validate_netlist_name(&name);

    if let Ok(text) = std::str::from_utf8(data) {
        let _ = dds_server::auth::parse_time_str(text);
        let _ = text.parse::<dds_server::IpMask>();
    }
});
