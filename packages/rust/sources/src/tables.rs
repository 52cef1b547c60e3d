//! Lookup tables the adapters build queries from.
//!
//! Adapters never hard-code terms, industry codes, or regions; they read them
//! from a [`SourceTables`] handed in at construction.

use std::collections::BTreeMap;

/// Search terms and listing sections for one service category.
#[derive(Debug, Clone)]
pub struct ServiceTerms {
    pub terms: Vec<String>,
    /// Narrow, high-yield section used when the category is primary.
    pub primary_section: String,
    /// Broad section used for secondary categories.
    pub secondary_section: String,
}

/// Classifieds region: which site to search and the minimum stated price kept.
#[derive(Debug, Clone)]
pub struct ClassifiedsRegion {
    pub markers: Vec<String>,
    pub site: String,
    pub min_value: f64,
}

/// Government region: place-of-performance code and minimum award kept.
#[derive(Debug, Clone)]
pub struct GovernmentRegion {
    pub markers: Vec<String>,
    pub state_code: String,
    pub min_value: f64,
}

#[derive(Debug, Clone)]
pub struct SourceTables {
    pub service_terms: BTreeMap<String, ServiceTerms>,
    pub industry_codes: BTreeMap<String, Vec<String>>,
    pub fallback_industry_code: String,
    pub set_aside_codes: Vec<String>,
    pub classifieds_regions: Vec<ClassifiedsRegion>,
    pub classifieds_default_min: f64,
    pub government_regions: Vec<GovernmentRegion>,
    pub government_default_min: f64,
}

impl SourceTables {
    /// Terms for `category`, falling back to the category name itself.
    pub fn terms_for(&self, category: &str) -> ServiceTerms {
        self.service_terms
            .get(&category.to_lowercase())
            .cloned()
            .unwrap_or_else(|| ServiceTerms {
                terms: vec![category.replace('_', " ")],
                primary_section: "lbg".into(),
                secondary_section: "ggg".into(),
            })
    }

    pub fn industry_codes_for(&self, category: &str) -> Vec<String> {
        self.industry_codes
            .get(&category.to_lowercase())
            .cloned()
            .unwrap_or_else(|| vec![self.fallback_industry_code.clone()])
    }

    /// Site slug and minimum price for a classifieds geography.
    ///
    /// Unknown geographies use the city part, lowercased with spaces removed.
    pub fn classifieds_region(&self, geography: &str) -> (String, f64) {
        let geo = geography.to_lowercase();
        if let Some(region) = self
            .classifieds_regions
            .iter()
            .find(|r| r.markers.iter().any(|m| geo.contains(m.as_str())))
        {
            return (region.site.clone(), region.min_value);
        }

        let city = geo.split(',').next().unwrap_or_default();
        let site: String = city.chars().filter(|c| c.is_ascii_alphanumeric()).collect();
        (site, self.classifieds_default_min)
    }

    /// State code and minimum award for a government geography.
    ///
    /// Unknown geographies use a trailing two-letter state code if present.
    pub fn government_region(&self, geography: &str) -> (Option<String>, f64) {
        let geo = geography.to_lowercase();
        if let Some(region) = self
            .government_regions
            .iter()
            .find(|r| r.markers.iter().any(|m| geo.contains(m.as_str())))
        {
            return (Some(region.state_code.clone()), region.min_value);
        }

        let state = geography
            .rsplit(',')
            .next()
            .map(str::trim)
            .filter(|s| s.len() == 2 && s.chars().all(|c| c.is_ascii_alphabetic()))
            .map(str::to_uppercase);
        (state, self.government_default_min)
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn service(terms: &[&str], primary: &str) -> ServiceTerms {
    ServiceTerms {
        terms: strings(terms),
        primary_section: primary.into(),
        secondary_section: "ggg".into(),
    }
}

impl Default for SourceTables {
    fn default() -> Self {
        let service_terms = [
            ("roofing", service(&["roof repair", "roofer needed", "roof replacement"], "lbg")),
            ("drywall", service(&["drywall repair", "drywall install", "sheetrock"], "lbg")),
            ("kitchen", service(&["kitchen remodel", "cabinet install", "countertop install"], "lbg")),
            ("bathroom", service(&["bathroom remodel", "shower install", "tile shower"], "lbg")),
            ("plumbing", service(&["plumber needed", "leak repair", "water heater install"], "lbg")),
            ("electrical", service(&["electrician needed", "outlet install", "panel upgrade"], "lbg")),
            ("painting", service(&["painter needed", "interior painting", "exterior painting"], "lbg")),
            ("hvac", service(&["hvac repair", "furnace repair", "ac install"], "lbg")),
            ("flooring", service(&["flooring install", "hardwood floor", "tile install"], "lbg")),
            ("landscaping", service(&["landscaping", "yard cleanup", "sod install"], "dmg")),
            ("handyman", service(&["handyman needed", "odd jobs", "home repair"], "dmg")),
            ("window_screen", service(&["window screen repair", "rescreen"], "dmg")),
            ("concrete", service(&["concrete work", "driveway repair", "patio pour"], "lbg")),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();

        let industry_codes: [(&str, &[&str]); 13] = [
            ("roofing", &["238160"]),
            ("drywall", &["238310"]),
            ("painting", &["238320"]),
            ("flooring", &["238330"]),
            ("electrical", &["238210"]),
            ("plumbing", &["238220"]),
            ("hvac", &["238220"]),
            ("concrete", &["238110"]),
            ("landscaping", &["561730"]),
            ("kitchen", &["236118"]),
            ("bathroom", &["236118"]),
            ("handyman", &["236118", "238990"]),
            ("window_screen", &["238150"]),
        ];
        let industry_codes = industry_codes
            .into_iter()
            .map(|(k, v)| (k.to_string(), strings(v)))
            .collect();

        let classifieds_regions = vec![
            ClassifiedsRegion {
                markers: strings(&["san francisco", "oakland", "san jose"]),
                site: "sfbay".into(),
                min_value: 250.0,
            },
            ClassifiedsRegion {
                markers: strings(&["new york", "brooklyn", "queens"]),
                site: "newyork".into(),
                min_value: 250.0,
            },
            ClassifiedsRegion {
                markers: strings(&["los angeles"]),
                site: "losangeles".into(),
                min_value: 200.0,
            },
            ClassifiedsRegion {
                markers: strings(&["washington, dc", "washington dc"]),
                site: "washingtondc".into(),
                min_value: 200.0,
            },
            ClassifiedsRegion {
                markers: strings(&["austin"]),
                site: "austin".into(),
                min_value: 150.0,
            },
            ClassifiedsRegion {
                markers: strings(&["denver"]),
                site: "denver".into(),
                min_value: 150.0,
            },
        ];

        let government_regions = vec![
            GovernmentRegion {
                markers: strings(&["washington, dc", "washington dc"]),
                state_code: "DC".into(),
                min_value: 50_000.0,
            },
            GovernmentRegion {
                markers: strings(&["san francisco", "los angeles", ", ca"]),
                state_code: "CA".into(),
                min_value: 25_000.0,
            },
            GovernmentRegion {
                markers: strings(&["new york", ", ny"]),
                state_code: "NY".into(),
                min_value: 25_000.0,
            },
        ];

        Self {
            service_terms,
            industry_codes,
            fallback_industry_code: "236220".into(),
            set_aside_codes: strings(&["SBA", "8A", "HZC", "SDVOSBC", "WOSB"]),
            classifieds_regions,
            classifieds_default_min: 50.0,
            government_regions,
            government_default_min: 10_000.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_category_uses_its_own_name() {
        let tables = SourceTables::default();
        assert_eq!(tables.terms_for("window_screen").terms[0], "window screen repair");
        assert_eq!(tables.terms_for("gazebo_build").terms, vec!["gazebo build"]);
        assert_eq!(tables.industry_codes_for("gazebo_build"), vec!["236220"]);
    }

    #[test]
    fn regions_resolve_by_marker_then_fallback() {
        let tables = SourceTables::default();
        assert_eq!(tables.classifieds_region("San Francisco, CA").0, "sfbay");
        assert_eq!(tables.classifieds_region("Boise, ID"), ("boise".to_string(), 50.0));
        assert_eq!(tables.classifieds_region("Salt Lake City, UT").0, "saltlakecity");

        assert_eq!(
            tables.government_region("Washington, DC"),
            (Some("DC".to_string()), 50_000.0)
        );
        assert_eq!(tables.government_region("Boise, ID").0.as_deref(), Some("ID"));
        assert_eq!(tables.government_region("somewhere").0, None);
    }
}
