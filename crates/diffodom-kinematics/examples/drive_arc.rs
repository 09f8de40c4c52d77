use diffodom_kinematics::*;

fn main() {
    let ticks_per_meter = 1000.0;
    let base_width = 0.245;
    let drive_result = DifferentialDrive::new(ticks_per_meter, base_width);

    // Right wheel runs 20% faster than the left one, so the robot curves left.
    let left_ticks_per_step = 10.0;
    let right_ticks_per_step = 12.0;
    let dt = 0.01; // Time step in seconds
    let num_steps = 10;

    match drive_result {
        Ok(drive) => {
            let mut odometry = Odometry::new(drive);
            println!("Initializing simulation...");
            println!("  Drive: {}", odometry.drive());
            println!("  Simulation Settings:");
            println!("    Time Step:    {} s", dt);
            println!("    Num Steps:    {}", num_steps);
            println!("\nSimulating...");

            for i in 0..=num_steps {
                let ticks = WheelTicks::new(
                    left_ticks_per_step * i as f64,
                    right_ticks_per_step * i as f64,
                );
                match odometry.update(ticks, dt) {
                    Ok(step) => {
                        println!(
                            "Step {:>2}: Ticks: {} Pose: {} Twist: {}",
                            i, ticks, step.pose, step.twist
                        );
                    }
                    Err(e) => {
                        eprintln!("Error during simulation step {}: {}", i, e);
                        break; // Stop loop on error
                    }
                }
            }

            println!("\nSimulation complete.");
            println!("Final Pose: {:?}", odometry.pose());
            println!("Path length: {:.4} m", odometry.path_length());
        }
        Err(e) => {
            eprintln!("Failed to initialize drive model: {}", e);
            eprintln!(
                "Please ensure ticks_per_meter ({}) and base_width ({}) are positive.",
                ticks_per_meter, base_width
            );
        }
    }
}
