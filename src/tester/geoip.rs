//! Local GeoIP enrichment from MaxMind databases.

use std::net::IpAddr;
use std::path::Path;

use log::{debug, warn};
use maxminddb::{geoip2, MaxMindDBError, Reader};

use crate::models::GeoInfo;

/// City and ASN databases, opened once and shared read-only between probes.
#[derive(Default)]
pub struct GeoIp {
    city: Option<Reader<Vec<u8>>>,
    asn: Option<Reader<Vec<u8>>>,
}

impl GeoIp {
    pub fn open(city_db: Option<&Path>, asn_db: Option<&Path>) -> Result<Self, MaxMindDBError> {
        let city = city_db.map(Reader::open_readfile).transpose()?;
        let asn = asn_db.map(Reader::open_readfile).transpose()?;
        Ok(GeoIp { city, asn })
    }

    /// Open whatever databases are readable; missing ones only log a warning.
    pub fn open_lenient(city_db: Option<&Path>, asn_db: Option<&Path>) -> Self {
        let open = |path: Option<&Path>, what: &str| {
            path.and_then(|path| match Reader::open_readfile(path) {
                Ok(reader) => Some(reader),
                Err(e) => {
                    warn!("GeoIP {} database '{}' unavailable: {}", what, path.display(), e);
                    None
                }
            })
        };
        GeoIp {
            city: open(city_db, "city"),
            asn: open(asn_db, "ASN"),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.city.is_none() && self.asn.is_none()
    }

    pub fn lookup(&self, ip: IpAddr) -> GeoInfo {
        let mut info = GeoInfo::default();

        if let Some(reader) = &self.city {
            match reader.lookup::<geoip2::City>(ip) {
                Ok(city) => {
                    info.country = city
                        .country
                        .and_then(|c| c.iso_code)
                        .map(|code| code.to_string());
                    info.city = city
                        .city
                        .and_then(|c| c.names)
                        .and_then(|names| names.get("en").map(|name| name.to_string()));
                }
                Err(e) => debug!("No city record for {}: {}", ip, e),
            }
        }

        if let Some(reader) = &self.asn {
            match reader.lookup::<geoip2::Asn>(ip) {
                Ok(asn) => info.asn = asn.autonomous_system_number,
                Err(e) => debug!("No ASN record for {}: {}", ip, e),
            }
        }

        info
    }
}
