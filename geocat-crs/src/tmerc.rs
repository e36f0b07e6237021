//! Projection math.
//!
//! Transverse Mercator uses the Krüger n-series carried to sixth order,
//! which is accurate to well under a millimetre within a few degrees of the
//! central meridian. Web Mercator is the spherical variant used by web map
//! tiles.

use std::f64::consts::FRAC_PI_4;

/// Reference ellipsoid
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ellipsoid {
    /// Semi-major axis in metres
    pub a: f64,
    /// Inverse flattening
    pub inv_f: f64,
}

impl Ellipsoid {
    pub const GRS80: Ellipsoid = Ellipsoid {
        a: 6_378_137.0,
        inv_f: 298.257_222_101,
    };

    fn third_flattening(&self) -> f64 {
        let f = 1.0 / self.inv_f;
        f / (2.0 - f)
    }
}

/// Gauss-Krüger transverse Mercator projection
#[derive(Debug, Clone, PartialEq)]
pub struct TransverseMercator {
    lon_0: f64,
    k_0: f64,
    false_easting: f64,
    false_northing: f64,
    /// Rectifying radius
    big_a: f64,
    e: f64,
    alpha: [f64; 6],
    beta: [f64; 6],
    delta: [f64; 6],
    /// ξ at the latitude of origin on the central meridian
    xi_0: f64,
}

impl TransverseMercator {
    pub fn new(
        ellipsoid: Ellipsoid,
        lat_0: f64,
        lon_0: f64,
        k_0: f64,
        false_easting: f64,
        false_northing: f64,
    ) -> Self {
        let n = ellipsoid.third_flattening();
        let n2 = n * n;
        let n3 = n2 * n;
        let n4 = n3 * n;
        let n5 = n4 * n;
        let n6 = n5 * n;

        let big_a = ellipsoid.a / (1.0 + n) * (1.0 + n2 / 4.0 + n4 / 64.0 + n6 / 256.0);
        let e = 2.0 * n.sqrt() / (1.0 + n);

        let alpha = [
            n / 2.0 - 2.0 / 3.0 * n2 + 5.0 / 16.0 * n3 + 41.0 / 180.0 * n4 - 127.0 / 288.0 * n5
                + 7891.0 / 37800.0 * n6,
            13.0 / 48.0 * n2 - 3.0 / 5.0 * n3 + 557.0 / 1440.0 * n4 + 281.0 / 630.0 * n5
                - 1983433.0 / 1935360.0 * n6,
            61.0 / 240.0 * n3 - 103.0 / 140.0 * n4 + 15061.0 / 26880.0 * n5
                + 167603.0 / 181440.0 * n6,
            49561.0 / 161280.0 * n4 - 179.0 / 168.0 * n5 + 6601661.0 / 7257600.0 * n6,
            34729.0 / 80640.0 * n5 - 3418889.0 / 1995840.0 * n6,
            212378941.0 / 319334400.0 * n6,
        ];
        let beta = [
            n / 2.0 - 2.0 / 3.0 * n2 + 37.0 / 96.0 * n3 - 1.0 / 360.0 * n4 - 81.0 / 512.0 * n5
                + 96199.0 / 604800.0 * n6,
            1.0 / 48.0 * n2 + 1.0 / 15.0 * n3 - 437.0 / 1440.0 * n4 + 46.0 / 105.0 * n5
                - 1118711.0 / 3870720.0 * n6,
            17.0 / 480.0 * n3 - 37.0 / 840.0 * n4 - 209.0 / 4480.0 * n5 + 5569.0 / 90720.0 * n6,
            4397.0 / 161280.0 * n4 - 11.0 / 504.0 * n5 - 830251.0 / 7257600.0 * n6,
            4583.0 / 161280.0 * n5 - 108847.0 / 3991680.0 * n6,
            20648693.0 / 638668800.0 * n6,
        ];
        let delta = [
            2.0 * n - 2.0 / 3.0 * n2 - 2.0 * n3 + 116.0 / 45.0 * n4 + 26.0 / 45.0 * n5
                - 2854.0 / 675.0 * n6,
            7.0 / 3.0 * n2 - 8.0 / 5.0 * n3 - 227.0 / 45.0 * n4 + 2704.0 / 315.0 * n5
                + 2323.0 / 945.0 * n6,
            56.0 / 15.0 * n3 - 136.0 / 35.0 * n4 - 1262.0 / 105.0 * n5 + 73814.0 / 2835.0 * n6,
            4279.0 / 630.0 * n4 - 332.0 / 35.0 * n5 - 399572.0 / 14175.0 * n6,
            4174.0 / 315.0 * n5 - 144838.0 / 6237.0 * n6,
            601676.0 / 22275.0 * n6,
        ];

        let mut tm = Self {
            lon_0,
            k_0,
            false_easting,
            false_northing,
            big_a,
            e,
            alpha,
            beta,
            delta,
            xi_0: 0.0,
        };
        tm.xi_0 = tm.xi_eta(lat_0.to_radians(), 0.0).0;
        tm
    }

    /// Normalised Gauss-Krüger coordinates (ξ, η) for a geodetic latitude
    /// and a longitude relative to the central meridian, both in radians.
    fn xi_eta(&self, phi: f64, lambda: f64) -> (f64, f64) {
        let sin_phi = phi.sin();
        let t = (sin_phi.atanh() - self.e * (self.e * sin_phi).atanh()).sinh();
        let xi_p = t.atan2(lambda.cos());
        let eta_p = (lambda.sin() / (1.0 + t * t).sqrt()).atanh();

        let mut xi = xi_p;
        let mut eta = eta_p;
        for (j, a) in self.alpha.iter().enumerate() {
            let k = 2.0 * (j as f64 + 1.0);
            xi += a * (k * xi_p).sin() * (k * eta_p).cosh();
            eta += a * (k * xi_p).cos() * (k * eta_p).sinh();
        }
        (xi, eta)
    }

    /// (lon, lat) in degrees to (easting, northing) in metres
    pub fn forward(&self, lon: f64, lat: f64) -> (f64, f64) {
        let (xi, eta) = self.xi_eta(lat.to_radians(), (lon - self.lon_0).to_radians());
        let scale = self.k_0 * self.big_a;
        (
            self.false_easting + scale * eta,
            self.false_northing + scale * (xi - self.xi_0),
        )
    }

    /// (easting, northing) in metres to (lon, lat) in degrees
    pub fn inverse(&self, x: f64, y: f64) -> (f64, f64) {
        let scale = self.k_0 * self.big_a;
        let xi = (y - self.false_northing) / scale + self.xi_0;
        let eta = (x - self.false_easting) / scale;

        let mut xi_p = xi;
        let mut eta_p = eta;
        for (j, b) in self.beta.iter().enumerate() {
            let k = 2.0 * (j as f64 + 1.0);
            xi_p -= b * (k * xi).sin() * (k * eta).cosh();
            eta_p -= b * (k * xi).cos() * (k * eta).sinh();
        }

        let chi = (xi_p.sin() / eta_p.cosh()).asin();
        let mut phi = chi;
        for (j, d) in self.delta.iter().enumerate() {
            phi += d * (2.0 * (j as f64 + 1.0) * chi).sin();
        }
        let lambda = eta_p.sinh().atan2(xi_p.cos());

        (self.lon_0 + lambda.to_degrees(), phi.to_degrees())
    }
}

/// Spherical ("pseudo") Mercator
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WebMercator {
    pub radius: f64,
}

impl WebMercator {
    pub fn forward(&self, lon: f64, lat: f64) -> (f64, f64) {
        let x = self.radius * lon.to_radians();
        let y = self.radius * (FRAC_PI_4 + lat.to_radians() / 2.0).tan().ln();
        (x, y)
    }

    pub fn inverse(&self, x: f64, y: f64) -> (f64, f64) {
        let lon = (x / self.radius).to_degrees();
        let lat = (2.0 * (y / self.radius).exp().atan() - std::f64::consts::FRAC_PI_2).to_degrees();
        (lon, lat)
    }
}
