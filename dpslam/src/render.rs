//! PPM output for map snapshots.
//!
//! Plain P6, 8 bit. The gray values 254..=251 are reserved overlay codes
//! (particle markers and the like) and map to fixed colors; everything
//! else is written as grayscale. Conversion to anything fancier is left
//! to external tools.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use dpmap::map::MapImage;

pub fn write_ppm(path: &Path, image: &MapImage) -> io::Result<()> {
    let file = File::create(path)?;
    let mut out = BufWriter::new(file);

    write!(out, "P6\n # particles.ppm \n {} {}\n", image.width, image.height)?;
    write!(out, "255\n")?;

    for &gray in &image.pixels {
        let rgb = match gray {
            254 => [255, 0, 0],
            253 => [0, 255, 200],
            252 => [255, 55, 55],
            251 => [50, 150, 255],
            g => [g, g, g],
        };
        out.write_all(&rgb)?;
    }
    out.flush()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn writes_a_well_formed_ppm() {
        let image = MapImage {
            x0: 0,
            y0: 0,
            width: 3,
            height: 2,
            pixels: vec![255, 128, 0, 254, 253, 10],
        };
        let mut path = std::env::temp_dir();
        path.push("dpslam-render-test.ppm");
        write_ppm(&path, &image).unwrap();

        let bytes = std::fs::read(&path).unwrap();
        let header_end = bytes.windows(4).position(|w| w == b"255\n").unwrap() + 4;
        assert!(bytes.starts_with(b"P6\n"));
        assert_eq!(bytes.len() - header_end, 3 * 2 * 3);

        // The overlay codes come out as color, not gray.
        let pixel = &bytes[header_end + 9..header_end + 12];
        assert_eq!(pixel, &[255, 0, 0]);

        std::fs::remove_file(&path).ok();
    }
}
