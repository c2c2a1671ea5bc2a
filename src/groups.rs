use crate::mapsync::property_string;
use geojson::{FeatureCollection, Value};
use serde::Serialize;

/// A community support group marker.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommunityGroup {
    pub lng: f64,
    pub lat: f64,
    pub title: String,
    pub location: String,
    pub url: String,
    pub source: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Popup {
    pub lng: f64,
    pub lat: f64,
    pub html: String,
}

/// Point features of the groups layer; anything that is not a point is dropped.
pub fn groups_from_features(collection: &FeatureCollection) -> Vec<CommunityGroup> {
    collection
        .features
        .iter()
        .filter_map(|feature| {
            let (lng, lat) = match &feature.geometry.as_ref()?.value {
                Value::Point(coords) if coords.len() >= 2 => (coords[0], coords[1]),
                _ => return None,
            };
            let text = |key: &str| property_string(feature, key).unwrap_or_default();
            Some(CommunityGroup {
                lng,
                lat,
                title: text("Title"),
                location: text("Location"),
                url: text("URL"),
                source: text("Source"),
            })
        })
        .collect()
}

/// Moves `lng` by whole turns until it is within 180 degrees of `click_lng`,
/// so the popup lands on the world copy that was clicked.
pub fn wrap_longitude(mut lng: f64, click_lng: f64) -> f64 {
    if !lng.is_finite() || !click_lng.is_finite() {
        return lng;
    }
    while (click_lng - lng).abs() > 180.0 {
        lng += if click_lng > lng { 360.0 } else { -360.0 };
    }
    lng
}

impl CommunityGroup {
    pub fn popup(&self, click_lng: f64) -> Popup {
        let url = htmlize::escape_attribute(self.url.as_str()).to_string();
        let html = format!(
            "<h4>{}</h4>\n<p><strong>Location:</strong> {}</p>\n<p><strong>URL:</strong> <a href=\"{}\" target=\"_blank\">{}</a></p>\n<p><strong>Source:</strong> {}</p>",
            htmlize::escape_text(self.title.as_str()),
            htmlize::escape_text(self.location.as_str()),
            url,
            htmlize::escape_text(self.url.as_str()),
            htmlize::escape_text(self.source.as_str()),
        );
        Popup {
            lng: wrap_longitude(self.lng, click_lng),
            lat: self.lat,
            html,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collection() -> FeatureCollection {
        let text = r#"{"type": "FeatureCollection", "features": [
            {"type": "Feature", "properties": {"Title": "Bangor <Helpers>", "Location": "Bangor", "URL": "https://example.org/?a=1&b=2", "Source": "Mutual Aid"},
             "geometry": {"type": "Point", "coordinates": [-4.13, 53.22]}},
            {"type": "Feature", "properties": {"Title": "No point"},
             "geometry": {"type": "LineString", "coordinates": [[0, 0], [1, 1]]}}
        ]}"#;
        match text.parse::<geojson::GeoJson>().unwrap() {
            geojson::GeoJson::FeatureCollection(fc) => fc,
            _ => unreachable!(),
        }
    }

    #[test]
    fn reads_point_groups() {
        let groups = groups_from_features(&collection());
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].location, "Bangor");
        assert_eq!(groups[0].lng, -4.13);
    }

    #[test]
    fn popup_escapes_fields() {
        let group = &groups_from_features(&collection())[0];
        let popup = group.popup(-4.0);
        assert!(popup.html.contains("Bangor &lt;Helpers&gt;"));
        assert!(popup.html.contains("a=1&amp;b=2"));
        assert!(popup.html.contains("<strong>Source:</strong> Mutual Aid"));
        assert_eq!(popup.lng, -4.13);
    }

    #[test]
    fn longitude_wraps_towards_click() {
        assert_eq!(wrap_longitude(-4.0, 356.0), 356.0);
        assert_eq!(wrap_longitude(-4.0, -364.0), -364.0);
        assert_eq!(wrap_longitude(-4.0, 10.0), -4.0);
        assert_eq!(wrap_longitude(170.0, -170.0), -190.0);
    }
}
