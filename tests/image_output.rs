use image::{ColorType, Rgba, RgbaImage};

use qr_backend::AppConfig;
use qr_backend::features::qr::{GenerationRequest, OutputFormat, PhysicalUnit};
use qr_backend::state::AppState;

fn state(use_new_service: bool, logo: Option<&std::path::Path>) -> AppState {
    let mut config = AppConfig::default();
    config.routing.use_new_service = use_new_service;
    config.image.default_logo_path = logo.map(|p| p.display().to_string());
    AppState::from_config(&config)
}

/// 半透明边缘的红色 Logo，写入临时目录
fn write_logo(name: &str) -> std::path::PathBuf {
    let mut logo = RgbaImage::from_pixel(64, 64, Rgba([220, 0, 0, 255]));
    for x in 0..64 {
        logo.put_pixel(x, 0, Rgba([220, 0, 0, 0]));
        logo.put_pixel(x, 63, Rgba([220, 0, 0, 96]));
    }
    let path = std::env::temp_dir().join(format!("{name}-{}.png", std::process::id()));
    logo.save(&path).expect("write logo");
    path
}

#[tokio::test]
async fn physical_png_is_rendered_at_print_size() {
    let mut req = GenerationRequest::new("https://example.com", OutputFormat::Png);
    req.size = 10;
    req.border = 4;
    req.physical_size = Some(2.0);
    req.physical_unit = Some(PhysicalUnit::In);
    req.dpi = Some(150);

    let out = state(true, None).generate_async(req, None).await.unwrap();
    let img = image::load_from_memory(&out.bytes).unwrap();
    assert!((img.width() as i64 - 300).abs() <= 1, "width={}", img.width());
    assert!((img.height() as i64 - 300).abs() <= 1, "height={}", img.height());
}

#[tokio::test]
async fn jpeg_with_logo_has_no_alpha_on_either_path() {
    let logo = write_logo("qr-logo-jpeg");
    for use_new_service in [true, false] {
        let mut req = GenerationRequest::new("https://example.com/logo", OutputFormat::Jpeg);
        req.include_logo = true;
        req.error_correction = "H".parse().unwrap();

        let out = state(use_new_service, Some(&logo))
            .generate_async(req, None)
            .await
            .unwrap();
        assert_eq!(out.content_type(), "image/jpeg");
        let img = image::load_from_memory(&out.bytes).unwrap();
        assert_eq!(img.color(), ColorType::Rgb8);

        let rgb = img.to_rgb8();
        let center = rgb.get_pixel(rgb.width() / 2, rgb.height() / 2);
        assert!(center[0] > 180 && center[1] < 60, "center={center:?}");
    }
    let _ = std::fs::remove_file(logo);
}

#[tokio::test]
async fn transparent_background_falls_back_to_white_for_webp() {
    let mut req = GenerationRequest::new("hello", OutputFormat::Webp);
    req.back_color = "transparent".to_string();

    let out = state(true, None).generate_async(req, None).await.unwrap();
    let img = image::load_from_memory(&out.bytes).unwrap().to_rgba8();
    assert_eq!(img.get_pixel(0, 0).0, [255, 255, 255, 255]);
}

#[tokio::test]
async fn missing_logo_degrades_to_plain_image() {
    let missing = std::env::temp_dir().join("qr-logo-does-not-exist.png");
    let mut req = GenerationRequest::new("hello", OutputFormat::Png);
    req.include_logo = true;

    let out = state(true, Some(&missing))
        .generate_async(req, None)
        .await
        .unwrap();
    assert!(image::load_from_memory(&out.bytes).is_ok());
}

#[test]
fn auxiliary_outputs_are_served_by_the_new_path() {
    let s = state(false, None);
    let mut req = GenerationRequest::new("hello", OutputFormat::Svg);
    req.svg_title = Some("Scan <me>".to_string());

    let inline = s.router.svg_inline(&req).unwrap();
    assert!(inline.starts_with("<svg width="));
    assert!(inline.contains("<title>Scan &lt;me&gt;</title>"));

    let uri = s.router.svg_data_uri(&req).unwrap();
    assert!(uri.starts_with("data:image/svg+xml;charset=utf-8,"));
    assert!(!uri.contains(' '));

    let png = s.router.png_data_uri(&req).unwrap();
    assert!(png.starts_with("data:image/png;base64,"));
}
