use crate::models::Coordinates;

pub const KENYAN_COUNTIES: &[&str] = &[
    "Baringo", "Bomet", "Bungoma", "Busia", "Elgeyo-Marakwet", "Embu", "Garissa",
    "Homa Bay", "Isiolo", "Kajiado", "Kakamega", "Kericho", "Kiambu", "Kilifi",
    "Kirinyaga", "Kisii", "Kisumu", "Kitui", "Kwale", "Laikipia", "Lamu", "Machakos",
    "Makueni", "Mandera", "Marsabit", "Meru", "Migori", "Mombasa", "Murang'a",
    "Nairobi", "Nakuru", "Nandi", "Narok", "Nyamira", "Nyandarua", "Nyeri",
    "Samburu", "Siaya", "Taita-Taveta", "Tana River", "Tharaka-Nithi", "Trans Nzoia",
    "Turkana", "Uasin Gishu", "Vihiga", "Wajir", "West Pokot",
];

pub const CROPS: &[&str] = &[
    "Maize", "Beans", "Potatoes", "Tomatoes", "Cabbage", "Kale", "Onions",
    "Avocado", "Mangoes", "Bananas", "Coffee", "Tea",
];

/// Map centre used when a listing has no coordinates of its own (Nairobi).
pub const DEFAULT_COORDINATES: Coordinates = Coordinates {
    lat: -1.2921,
    lng: 36.8219,
};

pub fn is_known_county(county: &str) -> bool {
    KENYAN_COUNTIES.contains(&county)
}

pub fn is_known_crop(crop: &str) -> bool {
    CROPS.contains(&crop)
}

pub fn map_url(coordinates: Coordinates) -> String {
    format!(
        "https://maps.google.com/maps?q={},{}&z=14&output=embed",
        coordinates.lat, coordinates.lng
    )
}
